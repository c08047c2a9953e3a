//! The dynamically typed operations behind every expression. Operand type
//! errors raise catchable exceptions reading `file:line: message`.

use std::rc::Rc;

use itertools::Itertools;

use crate::frontend::SourceLocation;

use super::{
    Heap, Runtime,
    error::{RtResult, RuntimeError},
    object::{
        ClassObject, FieldDescriptor, FieldInitializer, HeapObject, InstanceObject, MethodBody,
        MethodDescriptor,
    },
    value::{Address, TypeTag, Value},
};

/// Operator codes shared with the generated code
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::FromRepr)]
#[repr(i32)]
pub enum Operator {
    #[strum(serialize = "+")]
    Add,
    #[strum(serialize = "-")]
    Subtract,
    #[strum(serialize = "*")]
    Multiply,
    #[strum(serialize = "/")]
    Divide,
    #[strum(serialize = "%")]
    Modulus,
    #[strum(serialize = "==")]
    Equal,
    #[strum(serialize = "!=")]
    NotEqual,
    #[strum(serialize = "<")]
    Less,
    #[strum(serialize = "<=")]
    LessEqual,
    #[strum(serialize = ">")]
    Greater,
    #[strum(serialize = ">=")]
    GreaterEqual,
    #[strum(serialize = "and")]
    And,
    #[strum(serialize = "or")]
    Or,
}

enum Number {
    Int(i64),
    Float(f64),
}

impl Number {
    fn of(value: Value) -> Option<Self> {
        match value {
            Value::Int(value) => Some(Number::Int(value)),
            Value::Float(value) => Some(Number::Float(value)),
            Value::Bool(value) => Some(Number::Int(value as i64)),
            _ => None,
        }
    }

    fn as_float(&self) -> f64 {
        match *self {
            Number::Int(value) => value as f64,
            Number::Float(value) => value,
        }
    }
}

/// Resolves a slice bound against `len`: negative counts from the end, the
/// result is clamped into `0..=len`
fn slice_bound(bound: Option<i64>, len: usize, default: usize) -> usize {
    match bound {
        None => default,
        Some(bound) if bound < 0 => len.saturating_sub(bound.unsigned_abs() as usize),
        Some(bound) => (bound as usize).min(len),
    }
}

impl Runtime {
    /// `0`, `0.0`, `""`, `[]`, `{}` and `null` are false
    pub fn truthy(&self, value: Value) -> bool {
        match value {
            Value::Int(value) => value != 0,
            Value::Float(value) => value != 0.0,
            Value::Bool(value) => value,
            Value::Null => false,
            Value::Str(_) => self.text(value).is_some_and(|text| !text.is_empty()),
            Value::Array(address) => self.array(address).len != 0,
            Value::Dict(address) => !self.dict(address).is_empty(),
            Value::Class(_) | Value::Instance(_) => true,
        }
    }

    /// `==` semantics: numbers compare across int and float, strings by
    /// content, every other heap value by identity
    pub fn values_equal(&self, lhs: Value, rhs: Value) -> bool {
        match (lhs, rhs) {
            (Value::Str(_), Value::Str(_)) => self.text(lhs) == self.text(rhs),
            (Value::Bool(lhs), Value::Bool(rhs)) => lhs == rhs,
            (Value::Null, Value::Null) => true,
            (Value::Int(lhs), Value::Int(rhs)) => lhs == rhs,
            (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => {
                Number::of(lhs).map(|n| n.as_float()) == Number::of(rhs).map(|n| n.as_float())
            }
            _ => match (lhs.address(), rhs.address()) {
                (Some(lhs_address), Some(rhs_address)) => {
                    lhs.tag() == rhs.tag() && lhs_address == rhs_address
                }
                _ => false,
            },
        }
    }

    pub fn binary_op(
        &mut self,
        operator: Operator,
        lhs: Value,
        rhs: Value,
        site: &SourceLocation,
    ) -> RtResult<Value> {
        self.frame(&[lhs, rhs], |rt| rt.apply(operator, lhs, rhs, site))
    }

    fn apply(
        &mut self,
        operator: Operator,
        lhs: Value,
        rhs: Value,
        site: &SourceLocation,
    ) -> RtResult<Value> {
        use Operator::*;

        match operator {
            Equal => return Ok(Value::Bool(self.values_equal(lhs, rhs))),
            NotEqual => return Ok(Value::Bool(!self.values_equal(lhs, rhs))),
            And => return Ok(Value::Bool(self.truthy(lhs) && self.truthy(rhs))),
            Or => return Ok(Value::Bool(self.truthy(lhs) || self.truthy(rhs))),
            _ => {}
        }

        match (lhs, rhs) {
            (Value::Str(_), _) | (_, Value::Str(_)) if operator == Add => {
                let text = self.display(lhs) + &self.display(rhs);
                return self.string(text);
            }
            (Value::Str(_), Value::Int(count)) | (Value::Int(count), Value::Str(_))
                if operator == Multiply =>
            {
                let text = self.text(lhs).or(self.text(rhs)).unwrap_or_default().to_owned();
                let count = usize::try_from(count).unwrap_or(0);
                let bytes = text
                    .len()
                    .checked_mul(count)
                    .filter(|bytes| *bytes <= self.config.memory_limit);
                let Some(bytes) = bytes else {
                    return Err(RuntimeError::OutOfMemory {
                        requested: text.len().saturating_mul(count),
                        live: self.heap.live_bytes(),
                        limit: self.config.memory_limit,
                    }
                    .into());
                };

                self.reserve(1, Heap::footprint(bytes))?;
                return self.string(text.repeat(count));
            }
            (Value::Str(_), Value::Str(_)) if matches!(operator, Less | LessEqual | Greater | GreaterEqual) => {
                let ordering = self.text(lhs).cmp(&self.text(rhs));
                return Ok(Value::Bool(match operator {
                    Less => ordering.is_lt(),
                    LessEqual => ordering.is_le(),
                    Greater => ordering.is_gt(),
                    _ => ordering.is_ge(),
                }));
            }
            (Value::Array(lhs), Value::Array(rhs)) if operator == Add => {
                let elements = [self.array_elements(lhs), self.array_elements(rhs)].concat();
                return self.array_new(&elements);
            }
            _ => {}
        }

        let (Some(left), Some(right)) = (Number::of(lhs), Number::of(rhs)) else {
            return Err(self.error(
                site,
                format_args!("unsupported operand types for {operator}: {} and {}", lhs.tag(), rhs.tag()),
            ));
        };

        if let (Number::Int(left), Number::Int(right)) = (&left, &right) {
            let (left, right) = (*left, *right);
            return Ok(match operator {
                Add => Value::Int(left.wrapping_add(right)),
                Subtract => Value::Int(left.wrapping_sub(right)),
                Multiply => Value::Int(left.wrapping_mul(right)),
                Divide | Modulus if right == 0 => {
                    return Err(self.error(site, "division by zero"));
                }
                Divide => Value::Int(left.wrapping_div(right)),
                Modulus => Value::Int(left.wrapping_rem(right)),
                Less => Value::Bool(left < right),
                LessEqual => Value::Bool(left <= right),
                Greater => Value::Bool(left > right),
                GreaterEqual => Value::Bool(left >= right),
                Equal | NotEqual | And | Or => unreachable!("handled above"),
            });
        }

        let (left, right) = (left.as_float(), right.as_float());
        Ok(match operator {
            Add => Value::Float(left + right),
            Subtract => Value::Float(left - right),
            Multiply => Value::Float(left * right),
            Divide => Value::Float(left / right),
            Modulus => Value::Float(left % right),
            Less => Value::Bool(left < right),
            LessEqual => Value::Bool(left <= right),
            Greater => Value::Bool(left > right),
            GreaterEqual => Value::Bool(left >= right),
            Equal | NotEqual | And | Or => unreachable!("handled above"),
        })
    }

    /// `item in container`
    pub fn contains(&mut self, container: Value, item: Value, site: &SourceLocation) -> RtResult<Value> {
        let found = match container {
            Value::Str(_) => match (self.text(container), self.text(item)) {
                (Some(haystack), Some(needle)) => haystack.contains(needle),
                _ => {
                    return Err(self.error(
                        site,
                        format_args!("'in <string>' requires a string, not {}", item.tag()),
                    ));
                }
            },
            Value::Array(address) => self
                .array_elements(address)
                .into_iter()
                .any(|element| self.values_equal(element, item)),
            Value::Dict(address) => {
                let key = self.dict_key(item, site)?;
                self.dict(address).contains_key(&key)
            }
            _ => {
                return Err(self.error(
                    site,
                    format_args!("'in' is not supported on {}", container.tag()),
                ));
            }
        };

        Ok(Value::Bool(found))
    }

    /// Strings are used as they are, integers by their decimal text
    pub fn dict_key(&mut self, key: Value, site: &SourceLocation) -> RtResult<String> {
        match key {
            Value::Int(value) => Ok(value.to_string()),
            Value::Str(_) => Ok(self.text(key).unwrap_or_default().to_owned()),
            _ => Err(self.error(
                site,
                format_args!("dict keys must be strings or integers, not {}", key.tag()),
            )),
        }
    }

    fn element_index(&mut self, index: Value, len: usize, site: &SourceLocation) -> RtResult<usize> {
        match index {
            Value::Int(position) if (0..len as i64).contains(&position) => Ok(position as usize),
            Value::Int(position) => Err(self.error(
                site,
                format_args!("index {position} out of range for length {len}"),
            )),
            _ => Err(self.error(
                site,
                format_args!("indices must be integers, not {}", index.tag()),
            )),
        }
    }

    pub fn index_get(&mut self, container: Value, index: Value, site: &SourceLocation) -> RtResult<Value> {
        match container {
            Value::Array(address) => {
                let position = self.element_index(index, self.array(address).len, site)?;
                Ok(self.array_elements(address)[position])
            }
            Value::Str(_) => {
                let chars: Vec<char> = self.text(container).unwrap_or_default().chars().collect();
                let position = self.element_index(index, chars.len(), site)?;
                self.string(chars[position])
            }
            Value::Dict(address) => {
                let key = self.dict_key(index, site)?;
                match self.dict(address).get(&key) {
                    Some(value) => Ok(value),
                    None => Err(self.error(site, format_args!("key {key:?} not found"))),
                }
            }
            _ => Err(self.error(
                site,
                format_args!("{} is not indexable", container.tag()),
            )),
        }
    }

    pub fn index_set(
        &mut self,
        container: Value,
        index: Value,
        value: Value,
        site: &SourceLocation,
    ) -> RtResult<()> {
        match container {
            Value::Array(address) => {
                let position = self.element_index(index, self.array(address).len, site)?;
                self.array_store(address, position, value);
                Ok(())
            }
            Value::Dict(address) => {
                let key = self.dict_key(index, site)?;
                self.dict_mut(address).insert(key, value);
                Ok(())
            }
            _ => Err(self.error(
                site,
                format_args!("{} does not support item assignment", container.tag()),
            )),
        }
    }

    /// `container[start:end]` over strings and arrays. Either bound may be
    /// `null`.
    pub fn slice(
        &mut self,
        container: Value,
        start: Value,
        end: Value,
        site: &SourceLocation,
    ) -> RtResult<Value> {
        let mut bounds = [None, None];
        for (bound, value) in bounds.iter_mut().zip([start, end]) {
            *bound = match value {
                Value::Null => None,
                Value::Int(value) => Some(value),
                other => {
                    return Err(self.error(
                        site,
                        format_args!("slice bounds must be integers or null, not {}", other.tag()),
                    ));
                }
            };
        }

        self.frame(&[container], |rt| match container {
            Value::Str(_) => {
                let chars: Vec<char> = rt.text(container).unwrap_or_default().chars().collect();
                let from = slice_bound(bounds[0], chars.len(), 0);
                let to = slice_bound(bounds[1], chars.len(), chars.len()).max(from);
                rt.string(chars[from..to].iter().collect::<String>())
            }
            Value::Array(address) => {
                let elements = rt.array_elements(address);
                let from = slice_bound(bounds[0], elements.len(), 0);
                let to = slice_bound(bounds[1], elements.len(), elements.len()).max(from);
                rt.array_new(&elements[from..to])
            }
            _ => Err(rt.error(site, format_args!("{} cannot be sliced", container.tag()))),
        })
    }

    /// Elements of an array, characters of a string, entries of a dict
    pub fn length(&mut self, value: Value, site: &SourceLocation) -> RtResult<i64> {
        match value {
            Value::Str(_) => Ok(self.text(value).unwrap_or_default().chars().count() as i64),
            Value::Array(address) => Ok(self.array(address).len as i64),
            Value::Dict(address) => Ok(self.dict(address).len() as i64),
            _ => Err(self.error(site, format_args!("{} has no length", value.tag()))),
        }
    }

    /// A fresh array of the dict's keys, each exactly once
    pub fn dict_keys(&mut self, dict: Value, site: &SourceLocation) -> RtResult<Value> {
        let Value::Dict(address) = dict else {
            return Err(self.error(site, format_args!("keys expects a dict, not {}", dict.tag())));
        };

        let keys = self.dict(address).keys().map(str::to_owned).collect_vec();
        self.frame(&[dict], |rt| {
            let array = rt.allocate_array(&[])?;
            rt.frame(&[Value::Array(array)], |rt| {
                for key in keys {
                    let key = rt.string(key)?;
                    rt.array_push(array, key)?;
                }
                Ok(Value::Array(array))
            })
        })
    }

    pub fn to_int(&mut self, value: Value, site: &SourceLocation) -> RtResult<i64> {
        match value {
            Value::Int(value) => Ok(value),
            Value::Float(value) => Ok(value as i64),
            Value::Bool(value) => Ok(value as i64),
            _ => Err(self.error(site, format_args!("expected a number, not {}", value.tag()))),
        }
    }

    pub fn to_float(&mut self, value: Value, site: &SourceLocation) -> RtResult<f64> {
        match Number::of(value) {
            Some(number) => Ok(number.as_float()),
            None => Err(self.error(site, format_args!("expected a number, not {}", value.tag()))),
        }
    }

    /// Display text of any value; strings inside containers are quoted
    pub fn display(&self, value: Value) -> String {
        let mut text = String::new();
        self.write_display(value, false, &mut Vec::new(), &mut text);
        text
    }

    fn write_display(&self, value: Value, quoted: bool, open: &mut Vec<Address>, out: &mut String) {
        match value {
            Value::Int(value) => out.push_str(&value.to_string()),
            Value::Float(value) => out.push_str(&format!("{value:?}")),
            Value::Bool(value) => out.push_str(&value.to_string()),
            Value::Null => out.push_str("null"),
            Value::Str(_) => {
                let text = self.text(value).unwrap_or_default();
                if quoted {
                    out.push_str(&format!("{text:?}"));
                } else {
                    out.push_str(text);
                }
            }
            Value::Class(address) => {
                out.push_str(&format!("<class {}>", self.class(address).name));
            }
            Value::Instance(address) => {
                let instance = self.instance(address);
                out.push_str(&format!("<{} instance>", self.class(instance.class).name));
            }
            Value::Array(address) | Value::Dict(address) if open.contains(&address) => {
                out.push_str(if value.tag() == TypeTag::Array { "[...]" } else { "{...}" });
            }
            Value::Array(address) => {
                open.push(address);
                out.push('[');
                for (i, element) in self.array_elements(address).into_iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    self.write_display(element, true, open, out);
                }
                out.push(']');
                open.pop();
            }
            Value::Dict(address) => {
                open.push(address);
                out.push('{');
                for (i, entry) in self.dict(address).entries().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    out.push_str(&format!("{:?}: ", entry.key));
                    self.write_display(entry.value, true, open, out);
                }
                out.push('}');
                open.pop();
            }
        }
    }

    // -----------------------------------------------------------------------
    // Classes and instances
    // -----------------------------------------------------------------------

    fn class(&self, address: Address) -> &ClassObject {
        match &self.heap[address] {
            HeapObject::Class(class) => class,
            other => panic!("class value refers to a {}", other.kind()),
        }
    }

    fn class_mut(&mut self, class: Value) -> Option<&mut ClassObject> {
        match &mut self.heap[class.address()?] {
            HeapObject::Class(class) => Some(class),
            _ => None,
        }
    }

    fn instance(&self, address: Address) -> InstanceObject {
        match &self.heap[address] {
            HeapObject::Instance(instance) => *instance,
            other => panic!("instance value refers to a {}", other.kind()),
        }
    }

    /// A class object. Classes are pinned and never collected.
    pub fn class_new(&mut self, name: &str) -> RtResult<Value> {
        let class = ClassObject {
            name: name.to_owned(),
            ..ClassObject::default()
        };
        self.allocate(HeapObject::Class(class), true)
            .map(Value::Class)
    }

    pub fn class_add_field(
        &mut self,
        class: Value,
        name: &str,
        initializer: FieldInitializer,
        private: bool,
    ) {
        if let Some(class) = self.class_mut(class) {
            class.fields.push(FieldDescriptor {
                name: name.to_owned(),
                initializer,
                private,
            });
        }
    }

    pub fn class_add_method(
        &mut self,
        class: Value,
        name: &str,
        body: MethodBody,
        arity: usize,
        private: bool,
    ) {
        if let Some(class) = self.class_mut(class) {
            class.methods.push(MethodDescriptor {
                name: name.to_owned(),
                body,
                arity,
                private,
            });
        }
    }

    fn receiver(&mut self, target: Value, name: &str, site: &SourceLocation) -> RtResult<InstanceObject> {
        match target {
            Value::Instance(address) => Ok(self.instance(address)),
            _ => Err(self.error(
                site,
                format_args!("cannot access member `{name}` of {}", target.tag()),
            )),
        }
    }

    /// `target.name`. Private members are only visible through `this`.
    pub fn member_get(
        &mut self,
        target: Value,
        name: &str,
        internal: bool,
        site: &SourceLocation,
    ) -> RtResult<Value> {
        let instance = self.receiver(target, name, site)?;
        let class = self.class(instance.class);

        let private = match (class.field(name), class.method(name)) {
            (Some(field), _) => field.private,
            (None, Some(_)) => {
                return Err(self.error(site, format_args!("method `{name}` must be called")));
            }
            (None, None) => {
                let class = class.name.clone();
                return Err(self.error(site, format_args!("{class} has no member `{name}`")));
            }
        };
        if private && !internal {
            return Err(self.error(site, format_args!("member `{name}` is private")));
        }

        Ok(self.dict(instance.fields).get(name).unwrap_or(Value::Null))
    }

    pub fn member_set(
        &mut self,
        target: Value,
        name: &str,
        value: Value,
        internal: bool,
        site: &SourceLocation,
    ) -> RtResult<()> {
        let instance = self.receiver(target, name, site)?;
        let class = self.class(instance.class);

        let Some(field) = class.field(name) else {
            let class = class.name.clone();
            return Err(self.error(site, format_args!("{class} has no field `{name}`")));
        };
        if field.private && !internal {
            return Err(self.error(site, format_args!("member `{name}` is private")));
        }

        self.dict_mut(instance.fields).insert(name.to_owned(), value);
        Ok(())
    }

    /// `target.name(arguments)`, with the argument count checked against the
    /// method's arity
    pub fn call_method(
        &mut self,
        target: Value,
        name: &str,
        arguments: &[Value],
        internal: bool,
        site: &SourceLocation,
    ) -> RtResult<Value> {
        let instance = self.receiver(target, name, site)?;
        let class = self.class(instance.class);

        let Some(method) = class.method(name) else {
            let class = class.name.clone();
            return Err(self.error(site, format_args!("{class} has no method `{name}`")));
        };
        let (body, arity, private) = (Rc::clone(&method.body), method.arity, method.private);

        if private && !internal {
            return Err(self.error(site, format_args!("method `{name}` is private")));
        }
        if arity != arguments.len() {
            return Err(self.error(
                site,
                format_args!(
                    "`{name}` takes {arity} argument(s) but {} were supplied",
                    arguments.len()
                ),
            ));
        }

        let spilled = [&[target][..], arguments].concat();
        self.frame(&spilled, |rt| body(rt, target, arguments))
    }

    /// `new C(arguments)`: runs every field initializer in declaration order,
    /// then `init` if the class has one
    pub fn instantiate(
        &mut self,
        class: Value,
        arguments: &[Value],
        site: &SourceLocation,
    ) -> RtResult<Value> {
        let Value::Class(class_address) = class else {
            return Err(self.error(site, format_args!("cannot instantiate {}", class.tag())));
        };

        self.frame(arguments, |rt| {
            let fields = rt.allocate_dict()?;
            let instance = rt.frame(&[Value::Dict(fields)], |rt| {
                rt.allocate(
                    HeapObject::Instance(InstanceObject {
                        class: class_address,
                        fields,
                    }),
                    false,
                )
            })?;
            let receiver = Value::Instance(instance);

            rt.frame(&[receiver], |rt| {
                let initializers = rt
                    .class(class_address)
                    .fields
                    .iter()
                    .map(|field| (field.name.clone(), Rc::clone(&field.initializer)))
                    .collect_vec();

                for (name, initializer) in initializers {
                    let value = initializer(rt, receiver)?;
                    rt.dict_mut(fields).insert(name, value);
                }

                if rt.class(class_address).method("init").is_some() {
                    rt.call_method(receiver, "init", arguments, true, site)?;
                } else if !arguments.is_empty() {
                    let name = rt.class(class_address).name.clone();
                    return Err(rt.error(
                        site,
                        format_args!(
                            "`{name}` takes 0 argument(s) but {} were supplied",
                            arguments.len()
                        ),
                    ));
                }

                Ok(receiver)
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{Unwind, tests::runtime};

    fn site() -> SourceLocation {
        SourceLocation::new("main.em", 2)
    }

    fn field(initializer: impl Fn(&mut Runtime, Value) -> RtResult<Value> + 'static) -> FieldInitializer {
        Rc::new(initializer)
    }

    fn method(body: impl Fn(&mut Runtime, Value, &[Value]) -> RtResult<Value> + 'static) -> MethodBody {
        Rc::new(body)
    }

    /// `class Counter { count = 0; _step = 1; init(start) {...} add(n) {...} _reset() {...} }`
    fn counter(rt: &mut Runtime) -> Value {
        let class = rt.class_new("Counter").unwrap();
        rt.class_add_field(class, "count", field(|_, _| Ok(Value::Int(0))), false);
        rt.class_add_field(class, "_step", field(|_, _| Ok(Value::Int(1))), true);
        rt.class_add_method(
            class,
            "init",
            method(|rt, this, args| {
                rt.member_set(this, "count", args[0], true, &site())?;
                Ok(Value::Null)
            }),
            1,
            false,
        );
        rt.class_add_method(
            class,
            "add",
            method(|rt, this, args| {
                let count = rt.member_get(this, "count", true, &site())?;
                let sum = rt.binary_op(Operator::Add, count, args[0], &site())?;
                rt.member_set(this, "count", sum, true, &site())?;
                Ok(sum)
            }),
            1,
            false,
        );
        rt.class_add_method(class, "_reset", method(|_, _, _| Ok(Value::Null)), 0, true);
        class
    }

    #[test]
    fn instances_run_initializers_then_init() {
        let mut rt = runtime();
        let class = counter(&mut rt);

        let instance = rt.instantiate(class, &[Value::Int(10)], &site()).unwrap();
        assert_eq!(rt.member_get(instance, "count", false, &site()).unwrap(), Value::Int(10));
        assert_eq!(rt.member_get(instance, "_step", true, &site()).unwrap(), Value::Int(1));

        let sum = rt.call_method(instance, "add", &[Value::Int(5)], false, &site()).unwrap();
        assert_eq!(sum, Value::Int(15));
        assert_eq!(rt.display(instance), "<Counter instance>");
        assert_eq!(rt.display(class), "<class Counter>");
    }

    #[test]
    fn private_members_need_an_internal_access() {
        let mut rt = runtime();
        let class = counter(&mut rt);
        let instance = rt.instantiate(class, &[Value::Int(0)], &site()).unwrap();

        for result in [
            rt.member_get(instance, "_step", false, &site()).map(|_| ()),
            rt.member_set(instance, "_step", Value::Null, false, &site()),
            rt.call_method(instance, "_reset", &[], false, &site()).map(|_| ()),
        ] {
            assert!(matches!(result, Err(Unwind::Fatal(_))));
        }
        assert!(rt.call_method(instance, "_reset", &[], true, &site()).is_ok());
    }

    #[test]
    fn method_arity_is_checked_at_the_call() {
        let mut rt = runtime();
        let class = counter(&mut rt);
        let instance = rt.instantiate(class, &[Value::Int(0)], &site()).unwrap();

        let message = rt
            .try_catch(
                &site(),
                |rt| rt.call_method(instance, "add", &[], false, &site()).map(|_| String::new()),
                |rt, caught| Ok(rt.display(caught)),
            )
            .unwrap();
        assert_eq!(
            message,
            "[caught in main.em:2] main.em:2: `add` takes 1 argument(s) but 0 were supplied"
        );

        assert!(rt.instantiate(class, &[], &site()).is_err());
        assert!(rt.member_get(instance, "missing", false, &site()).is_err());
        assert!(rt.member_get(Value::Int(1), "count", false, &site()).is_err());
    }

    #[test]
    fn instances_survive_collections_inside_initializers() {
        let mut rt = runtime();
        let class = rt.class_new("Box").unwrap();
        rt.class_add_field(
            class,
            "items",
            field(|rt, _| {
                rt.collect();
                rt.array_new(&[Value::Int(1)])
            }),
            false,
        );
        rt.class_add_field(
            class,
            "label",
            field(|rt, _| {
                rt.collect();
                rt.string("box")
            }),
            false,
        );

        let instance = rt.instantiate(class, &[], &site()).unwrap();
        let items = rt.member_get(instance, "items", false, &site()).unwrap();
        let label = rt.member_get(instance, "label", false, &site()).unwrap();

        assert_eq!(rt.display(items), "[1]");
        assert_eq!(rt.text(label), Some("box"));
        assert!(rt.heap().contains(class.address().unwrap()));
    }

    #[test]
    fn string_repetition_is_bounded_by_the_memory_limit() {
        let mut rt = Runtime::new(crate::runtime::GcConfig {
            memory_limit: 4096,
            ..crate::runtime::GcConfig::default()
        });
        let text = rt.string("ab").unwrap();

        for count in [i64::MAX, 1 << 40, 3000] {
            let result = rt.binary_op(Operator::Multiply, text, Value::Int(count), &site());
            assert!(
                matches!(result, Err(Unwind::Fatal(crate::runtime::RuntimeError::OutOfMemory { .. }))),
                "{count}"
            );
        }

        let small = rt.binary_op(Operator::Multiply, Value::Int(3), text, &site()).unwrap();
        assert_eq!(rt.text(small), Some("ababab"));
        let empty = rt.binary_op(Operator::Multiply, text, Value::Int(-2), &site()).unwrap();
        assert_eq!(rt.text(empty), Some(""));
    }

    #[test]
    fn classes_are_pinned() {
        let mut rt = runtime();
        let class = rt.class_new("Lonely").unwrap();

        rt.collect();
        assert!(rt.heap().contains(class.address().unwrap()));
        assert_eq!(Operator::from_repr(4), Some(Operator::Modulus));
        assert_eq!(Operator::Or as i32, 12);
    }
}
