//! Entry points of the precompiled runtime and the native intrinsics the
//! generated code may call, with their signatures.

use hashbrown::HashMap;
use once_cell::sync::Lazy;

use super::Type;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, strum::Display, strum::EnumIter)]
pub enum RuntimeFunction {
    #[strum(serialize = "ember_gc_init")]
    GcInit,
    #[strum(serialize = "ember_gc_set_stack_bottom")]
    GcSetStackBottom,
    #[strum(serialize = "ember_gc_push_root")]
    GcPushRoot,
    #[strum(serialize = "ember_gc_pop_roots")]
    GcPopRoots,
    #[strum(serialize = "ember_set_args")]
    SetArgs,
    #[strum(serialize = "ember_int")]
    Int,
    #[strum(serialize = "ember_float")]
    Float,
    #[strum(serialize = "ember_bool")]
    Bool,
    #[strum(serialize = "ember_null")]
    Null,
    #[strum(serialize = "ember_string")]
    String,
    #[strum(serialize = "ember_to_int")]
    ToInt,
    #[strum(serialize = "ember_to_float")]
    ToFloat,
    #[strum(serialize = "ember_truthy")]
    Truthy,
    #[strum(serialize = "ember_binary_op")]
    BinaryOp,
    #[strum(serialize = "ember_contains")]
    Contains,
    #[strum(serialize = "ember_array_new")]
    ArrayNew,
    #[strum(serialize = "ember_dict_new")]
    DictNew,
    #[strum(serialize = "ember_index_get")]
    IndexGet,
    #[strum(serialize = "ember_index_set")]
    IndexSet,
    #[strum(serialize = "ember_slice")]
    Slice,
    #[strum(serialize = "ember_length")]
    Length,
    #[strum(serialize = "ember_dict_keys")]
    DictKeys,
    #[strum(serialize = "ember_member_get")]
    MemberGet,
    #[strum(serialize = "ember_member_set")]
    MemberSet,
    #[strum(serialize = "ember_call_method")]
    CallMethod,
    #[strum(serialize = "ember_class_new")]
    ClassNew,
    #[strum(serialize = "ember_class_add_field")]
    ClassAddField,
    #[strum(serialize = "ember_class_add_method")]
    ClassAddMethod,
    #[strum(serialize = "ember_instantiate")]
    Instantiate,
    #[strum(serialize = "ember_try_push")]
    TryPush,
    #[strum(serialize = "ember_try_pop")]
    TryPop,
    #[strum(serialize = "ember_current_exception")]
    CurrentException,
    #[strum(serialize = "ember_raise")]
    Raise,
    #[strum(serialize = "ember_builtin_print")]
    BuiltinPrint,
    #[strum(serialize = "ember_builtin_len")]
    BuiltinLen,
    #[strum(serialize = "ember_builtin_str")]
    BuiltinStr,
    #[strum(serialize = "ember_builtin_int")]
    BuiltinInt,
    #[strum(serialize = "ember_builtin_float")]
    BuiltinFloat,
    #[strum(serialize = "ember_builtin_type")]
    BuiltinType,
    #[strum(serialize = "ember_builtin_keys")]
    BuiltinKeys,
    #[strum(serialize = "ember_builtin_append")]
    BuiltinAppend,
    #[strum(serialize = "ember_builtin_has_key")]
    BuiltinHasKey,
    #[strum(serialize = "ember_builtin_input")]
    BuiltinInput,
    #[strum(serialize = "ember_builtin_args")]
    BuiltinArgs,
}

/// `(line, file)` trailing every entry point that can raise
const SITE: [Type; 2] = [Type::I32, Type::Ptr];

impl RuntimeFunction {
    pub fn return_type(self) -> Type {
        use RuntimeFunction::*;

        match self {
            GcInit | GcSetStackBottom | GcPushRoot | GcPopRoots | SetArgs | IndexSet
            | MemberSet | ClassAddField | ClassAddMethod | TryPop | Raise => Type::Void,
            ToInt | Length => Type::I64,
            ToFloat => Type::F64,
            Truthy => Type::I1,
            TryPush => Type::Ptr,
            _ => Type::Value,
        }
    }

    pub fn parameters(self) -> Vec<Type> {
        use RuntimeFunction::*;
        use Type::*;

        let mut parameters = match self {
            GcInit | Null | DictNew | TryPush | TryPop | CurrentException => vec![],
            GcSetStackBottom | GcPushRoot | String | ClassNew => vec![Ptr],
            GcPopRoots => vec![I32],
            SetArgs => vec![I32, Ptr],
            Int => vec![I64],
            Float => vec![F64],
            Bool => vec![I1],
            Truthy | Length | DictKeys => vec![Value],
            ToInt | ToFloat | Raise => vec![Value],
            BinaryOp => vec![I32, Value, Value],
            Contains | IndexGet => vec![Value, Value],
            IndexSet | Slice => vec![Value, Value, Value],
            ArrayNew => vec![Ptr, I32],
            MemberGet => vec![Value, Ptr, I1],
            MemberSet => vec![Value, Ptr, Value, I1],
            CallMethod => vec![Value, Ptr, Ptr, I32, I1],
            ClassAddField => vec![Value, Ptr, Ptr, I1],
            ClassAddMethod => vec![Value, Ptr, Ptr, I32, I1],
            Instantiate => vec![Value, Ptr, I32],
            BuiltinPrint | BuiltinLen | BuiltinStr | BuiltinInt | BuiltinFloat | BuiltinType
            | BuiltinKeys | BuiltinAppend | BuiltinHasKey | BuiltinInput | BuiltinArgs => {
                vec![Ptr, I32]
            }
        };

        if self.reports_site() {
            parameters.extend(SITE);
        }

        parameters
    }

    /// Whether the entry point takes the calling line and file
    pub fn reports_site(self) -> bool {
        use RuntimeFunction::*;

        matches!(
            self,
            ToInt
                | ToFloat
                | Length
                | DictKeys
                | BinaryOp
                | Contains
                | IndexGet
                | IndexSet
                | Slice
                | MemberGet
                | MemberSet
                | CallMethod
                | Instantiate
                | Raise
                | BuiltinPrint
                | BuiltinLen
                | BuiltinStr
                | BuiltinInt
                | BuiltinFloat
                | BuiltinType
                | BuiltinKeys
                | BuiltinAppend
                | BuiltinHasKey
                | BuiltinInput
                | BuiltinArgs
        )
    }

    pub fn is_noreturn(self) -> bool {
        self == Self::Raise
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, strum::Display, strum::EnumIter)]
pub enum Intrinsic {
    #[strum(serialize = "llvm.sqrt.f64")]
    Sqrt,
    #[strum(serialize = "llvm.sin.f64")]
    Sin,
    #[strum(serialize = "llvm.cos.f64")]
    Cos,
    #[strum(serialize = "llvm.exp.f64")]
    Exp,
    #[strum(serialize = "llvm.log.f64")]
    Log,
    #[strum(serialize = "llvm.floor.f64")]
    Floor,
    #[strum(serialize = "llvm.ceil.f64")]
    Ceil,
    #[strum(serialize = "llvm.fabs.f64")]
    Fabs,
    /// The checkpoint half of try/catch
    #[strum(serialize = "_setjmp")]
    SetJmp,
}

impl Intrinsic {
    pub fn return_type(self) -> Type {
        match self {
            Self::SetJmp => Type::I32,
            _ => Type::F64,
        }
    }

    pub fn parameters(self) -> Vec<Type> {
        match self {
            Self::SetJmp => vec![Type::Ptr],
            _ => vec![Type::F64],
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Builtin {
    pub function: RuntimeFunction,
    /// `None` for variadic builtins
    pub arity: Option<usize>,
}

/// Source-level builtin names. Several collide with reserved words of the
/// target, so they are always rewritten to their runtime entry point.
pub static BUILTINS: Lazy<HashMap<&'static str, Builtin>> = Lazy::new(|| {
    use RuntimeFunction::*;

    [
        ("print", BuiltinPrint, None),
        ("len", BuiltinLen, Some(1)),
        ("str", BuiltinStr, Some(1)),
        ("int", BuiltinInt, Some(1)),
        ("float", BuiltinFloat, Some(1)),
        ("type", BuiltinType, Some(1)),
        ("keys", BuiltinKeys, Some(1)),
        ("append", BuiltinAppend, Some(2)),
        ("has_key", BuiltinHasKey, Some(2)),
        ("input", BuiltinInput, Some(0)),
        ("args", BuiltinArgs, Some(0)),
    ]
    .into_iter()
    .map(|(name, function, arity)| (name, Builtin { function, arity }))
    .collect()
});

/// Calls that lower straight to native floating point instructions
pub static TRANSCENDENTALS: Lazy<HashMap<&'static str, Intrinsic>> = Lazy::new(|| {
    use Intrinsic::*;

    [
        ("sqrt", Sqrt),
        ("sin", Sin),
        ("cos", Cos),
        ("exp", Exp),
        ("log", Log),
        ("floor", Floor),
        ("ceil", Ceil),
        ("abs", Fabs),
    ]
    .into_iter()
    .collect()
});

#[cfg(test)]
mod tests {
    use strum::IntoEnumIterator;

    use super::*;

    #[test]
    fn every_entry_point_is_namespaced() {
        for function in RuntimeFunction::iter() {
            assert!(function.to_string().starts_with("ember_"), "{function:?}");
        }
    }

    #[test]
    fn raising_entry_points_take_the_call_site() {
        let parameters = RuntimeFunction::BinaryOp.parameters();
        assert_eq!(
            parameters,
            vec![Type::I32, Type::Value, Type::Value, Type::I32, Type::Ptr]
        );
        assert_eq!(RuntimeFunction::Truthy.parameters(), vec![Type::Value]);
        assert_eq!(
            RuntimeFunction::Length.parameters(),
            vec![Type::Value, Type::I32, Type::Ptr]
        );
    }

    #[test]
    fn builtin_names_are_rewritten() {
        assert_eq!(BUILTINS["int"].function.to_string(), "ember_builtin_int");
        assert_eq!(BUILTINS["print"].arity, None);
        assert_eq!(TRANSCENDENTALS["abs"].to_string(), "llvm.fabs.f64");
    }
}
