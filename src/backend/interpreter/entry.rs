//! Binds every runtime entry point the IR declares to the [`Runtime`]
//! operation of the same meaning. Arguments are decoded against the entry
//! point's declared parameter list, so a call whose arity, types or site
//! shape disagrees with its declaration fails here.

use std::rc::Rc;

use crate::{
    frontend::SourceLocation,
    middle::lir::{Intrinsic, RuntimeFunction, Type},
    runtime::{
        RtResult, Runtime, Value,
        object::{FieldInitializer, MethodBody},
        ops::Operator,
        roots::SlotId,
    },
};

use super::{Image, Pointer, Scalar};

type BuiltinOperation = fn(&mut Runtime, &[Value], &SourceLocation) -> RtResult<Value>;

fn builtin(function: RuntimeFunction) -> Option<BuiltinOperation> {
    use RuntimeFunction::*;

    let operation: BuiltinOperation = match function {
        BuiltinPrint => Runtime::builtin_print,
        BuiltinLen => Runtime::builtin_len,
        BuiltinStr => Runtime::builtin_str,
        BuiltinInt => Runtime::builtin_int,
        BuiltinFloat => Runtime::builtin_float,
        BuiltinType => Runtime::builtin_type,
        BuiltinKeys => Runtime::builtin_keys,
        BuiltinAppend => Runtime::builtin_append,
        BuiltinHasKey => Runtime::builtin_has_key,
        BuiltinInput => Runtime::builtin_input,
        BuiltinArgs => Runtime::builtin_args,
        _ => return None,
    };
    Some(operation)
}

/// Reads the arguments of one call in declaration order
struct Arguments<'i> {
    image: &'i Image,
    function: RuntimeFunction,
    parameters: Vec<Type>,
    scalars: std::vec::IntoIter<Scalar>,
    position: usize,
}

impl<'i> Arguments<'i> {
    fn new(image: &'i Image, function: RuntimeFunction, scalars: Vec<Scalar>) -> Self {
        let parameters = function.parameters();
        assert_eq!(
            parameters.len(),
            scalars.len(),
            "`{function}` declares {} parameter(s)",
            parameters.len()
        );

        Self {
            image,
            function,
            parameters,
            scalars: scalars.into_iter(),
            position: 0,
        }
    }

    fn next(&mut self, ty: Type) -> Scalar {
        let declared = self.parameters[self.position];
        assert_eq!(
            declared, ty,
            "parameter {} of `{}` is declared {declared:?}",
            self.position, self.function
        );

        let scalar = self.scalars.next().expect("counted in `new`");
        assert!(
            scalar.has_type(ty),
            "argument {} of `{}` is {scalar:?}, not {ty:?}",
            self.position,
            self.function
        );

        self.position += 1;
        scalar
    }

    fn value(&mut self) -> Value {
        self.next(Type::Value).value()
    }

    fn int(&mut self, ty: Type) -> i64 {
        self.next(ty).int()
    }

    fn flag(&mut self) -> bool {
        self.int(Type::I1) != 0
    }

    fn count(&mut self) -> usize {
        self.int(Type::I32) as usize
    }

    fn float(&mut self) -> f64 {
        self.next(Type::F64).float()
    }

    fn pointer(&mut self) -> Pointer {
        self.next(Type::Ptr).pointer()
    }

    fn text(&mut self) -> &'i str {
        let image = self.image;
        match self.pointer() {
            Pointer::String(id) => image.text(id),
            other => panic!("`{}` expects a string constant, found {other:?}", self.function),
        }
    }

    fn slot(&mut self) -> SlotId {
        match self.pointer() {
            Pointer::Values(slots, offset) => slots[offset],
            other => panic!("`{}` expects a value slot, found {other:?}", self.function),
        }
    }

    fn word(&mut self) -> usize {
        match self.pointer() {
            Pointer::Word(word) => word,
            other => panic!("`{}` expects a stack word, found {other:?}", self.function),
        }
    }

    fn symbol(&mut self) -> String {
        match self.pointer() {
            Pointer::Function(symbol) => symbol,
            other => panic!("`{}` expects a function, found {other:?}", self.function),
        }
    }

    /// A `(ptr, i32)` pair addressing consecutive values
    fn values(&mut self, rt: &Runtime) -> Vec<Value> {
        let buffer = self.pointer();
        let count = self.count();

        match buffer {
            Pointer::Values(slots, offset) => slots[offset..offset + count]
                .iter()
                .map(|slot| rt.load(*slot))
                .collect(),
            other => panic!("`{}` expects a value buffer, found {other:?}", self.function),
        }
    }

    /// The trailing `(i32 line, ptr file)` of a raising entry point
    fn site(&mut self) -> SourceLocation {
        let line = self.int(Type::I32) as u32;
        let file = self.text();
        SourceLocation::new(file, line)
    }

    fn finish(self) {
        assert_eq!(
            self.position,
            self.parameters.len(),
            "`{}` left arguments unread",
            self.function
        );
    }
}

pub(super) fn intrinsic(intrinsic: Intrinsic, operand: f64) -> f64 {
    match intrinsic {
        Intrinsic::Sqrt => operand.sqrt(),
        Intrinsic::Sin => operand.sin(),
        Intrinsic::Cos => operand.cos(),
        Intrinsic::Exp => operand.exp(),
        Intrinsic::Log => operand.ln(),
        Intrinsic::Floor => operand.floor(),
        Intrinsic::Ceil => operand.ceil(),
        Intrinsic::Fabs => operand.abs(),
        Intrinsic::SetJmp => unreachable!("`_setjmp` is handled by the frame"),
    }
}

fn field_initializer(image: &Rc<Image>, symbol: String) -> FieldInitializer {
    let image = Rc::clone(image);
    Rc::new(move |rt: &mut Runtime, this: Value| {
        image
            .call(rt, &symbol, vec![Scalar::Value(this)])
            .map(Scalar::value)
    })
}

fn method_body(image: &Rc<Image>, symbol: String) -> MethodBody {
    let image = Rc::clone(image);
    Rc::new(move |rt: &mut Runtime, this: Value, arguments: &[Value]| {
        let slots: Rc<[SlotId]> = arguments
            .iter()
            .map(|argument| {
                let slot = image.acquire(rt);
                rt.store(slot, *argument);
                slot
            })
            .collect();

        let result = image.call(
            rt,
            &symbol,
            vec![
                Scalar::Value(this),
                Scalar::Ptr(Pointer::Values(Rc::clone(&slots), 0)),
                Scalar::Int(arguments.len() as i64),
            ],
        );

        image.release(slots.iter().copied());
        result.map(Scalar::value)
    })
}

/// Performs one runtime call
pub(super) fn call(
    image: &Rc<Image>,
    rt: &mut Runtime,
    function: RuntimeFunction,
    arguments: Vec<Scalar>,
) -> RtResult<Scalar> {
    use RuntimeFunction::*;

    let mut arguments = Arguments::new(image, function, arguments);

    if let Some(operation) = builtin(function) {
        let values = arguments.values(rt);
        let site = arguments.site();
        arguments.finish();
        return operation(rt, &values, &site).map(Scalar::Value);
    }

    let result = match function {
        GcInit => {
            arguments.finish();
            Scalar::Void
        }
        GcSetStackBottom => {
            let marker = arguments.word();
            arguments.finish();
            rt.machine_stack().set_bottom_at(marker);
            Scalar::Void
        }
        GcPushRoot => {
            let slot = arguments.slot();
            arguments.finish();
            rt.push_root(slot)?;
            Scalar::Void
        }
        GcPopRoots => {
            let count = arguments.count();
            arguments.finish();
            rt.pop_roots(count)?;
            Scalar::Void
        }
        SetArgs => {
            let count = arguments.count();
            let vector = arguments.pointer();
            arguments.finish();
            assert_eq!(
                (count, vector),
                (image.arguments.len(), Pointer::Arguments),
                "`main` forwards its own argc and argv"
            );
            rt.set_args(image.arguments.iter().cloned());
            Scalar::Void
        }
        Int => {
            let value = arguments.int(Type::I64);
            arguments.finish();
            Scalar::Value(Value::Int(value))
        }
        Float => {
            let value = arguments.float();
            arguments.finish();
            Scalar::Value(Value::Float(value))
        }
        Bool => {
            let value = arguments.flag();
            arguments.finish();
            Scalar::Value(Value::Bool(value))
        }
        Null => {
            arguments.finish();
            Scalar::Value(Value::Null)
        }
        String => {
            let text = arguments.text();
            arguments.finish();
            Scalar::Value(rt.string(text)?)
        }
        ToInt => {
            let value = arguments.value();
            let site = arguments.site();
            arguments.finish();
            Scalar::Int(rt.to_int(value, &site)?)
        }
        ToFloat => {
            let value = arguments.value();
            let site = arguments.site();
            arguments.finish();
            Scalar::Float(rt.to_float(value, &site)?)
        }
        Truthy => {
            let value = arguments.value();
            arguments.finish();
            Scalar::Int(rt.truthy(value) as i64)
        }
        BinaryOp => {
            let code = arguments.int(Type::I32);
            let (lhs, rhs) = (arguments.value(), arguments.value());
            let site = arguments.site();
            arguments.finish();

            let operator = i32::try_from(code)
                .ok()
                .and_then(Operator::from_repr)
                .unwrap_or_else(|| panic!("unknown operator code {code}"));
            Scalar::Value(rt.binary_op(operator, lhs, rhs, &site)?)
        }
        Contains => {
            let (container, item) = (arguments.value(), arguments.value());
            let site = arguments.site();
            arguments.finish();
            Scalar::Value(rt.contains(container, item, &site)?)
        }
        ArrayNew => {
            let elements = arguments.values(rt);
            arguments.finish();
            Scalar::Value(rt.array_new(&elements)?)
        }
        DictNew => {
            arguments.finish();
            Scalar::Value(rt.dict_new()?)
        }
        IndexGet => {
            let (container, index) = (arguments.value(), arguments.value());
            let site = arguments.site();
            arguments.finish();
            Scalar::Value(rt.index_get(container, index, &site)?)
        }
        IndexSet => {
            let (container, index, value) = (arguments.value(), arguments.value(), arguments.value());
            let site = arguments.site();
            arguments.finish();
            rt.index_set(container, index, value, &site)?;
            Scalar::Void
        }
        Slice => {
            let (container, start, end) = (arguments.value(), arguments.value(), arguments.value());
            let site = arguments.site();
            arguments.finish();
            Scalar::Value(rt.slice(container, start, end, &site)?)
        }
        Length => {
            let value = arguments.value();
            let site = arguments.site();
            arguments.finish();
            Scalar::Int(rt.length(value, &site)?)
        }
        DictKeys => {
            let dict = arguments.value();
            let site = arguments.site();
            arguments.finish();
            Scalar::Value(rt.dict_keys(dict, &site)?)
        }
        MemberGet => {
            let (target, name, internal) = (arguments.value(), arguments.text(), arguments.flag());
            let site = arguments.site();
            arguments.finish();
            Scalar::Value(rt.member_get(target, name, internal, &site)?)
        }
        MemberSet => {
            let (target, name, value) = (arguments.value(), arguments.text(), arguments.value());
            let internal = arguments.flag();
            let site = arguments.site();
            arguments.finish();
            rt.member_set(target, name, value, internal, &site)?;
            Scalar::Void
        }
        CallMethod => {
            let (target, name) = (arguments.value(), arguments.text());
            let values = arguments.values(rt);
            let internal = arguments.flag();
            let site = arguments.site();
            arguments.finish();
            Scalar::Value(rt.call_method(target, name, &values, internal, &site)?)
        }
        ClassNew => {
            let name = arguments.text();
            arguments.finish();
            Scalar::Value(rt.class_new(name)?)
        }
        ClassAddField => {
            let (class, name, symbol) = (arguments.value(), arguments.text(), arguments.symbol());
            let private = arguments.flag();
            arguments.finish();
            rt.class_add_field(class, name, field_initializer(image, symbol), private);
            Scalar::Void
        }
        ClassAddMethod => {
            let (class, name, symbol) = (arguments.value(), arguments.text(), arguments.symbol());
            let (arity, private) = (arguments.count(), arguments.flag());
            arguments.finish();
            rt.class_add_method(class, name, method_body(image, symbol), arity, private);
            Scalar::Void
        }
        Instantiate => {
            let class = arguments.value();
            let values = arguments.values(rt);
            let site = arguments.site();
            arguments.finish();
            Scalar::Value(rt.instantiate(class, &values, &site)?)
        }
        TryPush => {
            arguments.finish();
            rt.try_push();
            Scalar::Ptr(Pointer::Checkpoint(rt.try_depth()))
        }
        TryPop => {
            arguments.finish();
            rt.try_pop();
            Scalar::Void
        }
        CurrentException => {
            arguments.finish();
            Scalar::Value(rt.current_exception())
        }
        Raise => {
            let value = arguments.value();
            let site = arguments.site();
            arguments.finish();
            return Err(rt.raise(value, &site));
        }
        BuiltinPrint | BuiltinLen | BuiltinStr | BuiltinInt | BuiltinFloat | BuiltinType
        | BuiltinKeys | BuiltinAppend | BuiltinHasKey | BuiltinInput | BuiltinArgs => {
            unreachable!("builtins are dispatched above")
        }
    };

    debug_assert!(
        result.has_type(function.return_type()),
        "`{function}` returned {result:?}"
    );
    Ok(result)
}
