//! Builtin functions callable from source programs. Each takes the marshalled
//! argument list and the calling site.

use itertools::Itertools;

use crate::frontend::SourceLocation;

use super::{Runtime, error::RtResult, value::Value};

impl Runtime {
    fn expect_arguments(
        &mut self,
        name: &str,
        arguments: &[Value],
        count: usize,
        site: &SourceLocation,
    ) -> RtResult<()> {
        if arguments.len() == count {
            return Ok(());
        }
        Err(self.error(
            site,
            format_args!(
                "`{name}` takes {count} argument(s) but {} were supplied",
                arguments.len()
            ),
        ))
    }

    /// Writes the display text of every argument, space separated, and a
    /// newline
    pub fn builtin_print(&mut self, arguments: &[Value], _site: &SourceLocation) -> RtResult<Value> {
        let line = arguments.iter().map(|value| self.display(*value)).join(" ");
        self.write_line(&line)?;
        Ok(Value::Null)
    }

    pub fn builtin_len(&mut self, arguments: &[Value], site: &SourceLocation) -> RtResult<Value> {
        self.expect_arguments("len", arguments, 1, site)?;
        self.length(arguments[0], site).map(Value::Int)
    }

    pub fn builtin_str(&mut self, arguments: &[Value], site: &SourceLocation) -> RtResult<Value> {
        self.expect_arguments("str", arguments, 1, site)?;
        match arguments[0] {
            text @ Value::Str(_) => Ok(text),
            other => {
                let text = self.display(other);
                self.string(text)
            }
        }
    }

    pub fn builtin_int(&mut self, arguments: &[Value], site: &SourceLocation) -> RtResult<Value> {
        self.expect_arguments("int", arguments, 1, site)?;

        let value = arguments[0];
        let Some(text) = self.text(value) else {
            return self.to_int(value, site).map(Value::Int);
        };

        let text = text.trim();
        match text
            .parse::<i64>()
            .ok()
            .or_else(|| text.parse::<f64>().ok().map(|float| float as i64))
        {
            Some(parsed) => Ok(Value::Int(parsed)),
            None => {
                let text = text.to_owned();
                Err(self.error(site, format_args!("cannot convert {text:?} to int")))
            }
        }
    }

    pub fn builtin_float(&mut self, arguments: &[Value], site: &SourceLocation) -> RtResult<Value> {
        self.expect_arguments("float", arguments, 1, site)?;

        let value = arguments[0];
        let Some(text) = self.text(value) else {
            return self.to_float(value, site).map(Value::Float);
        };

        match text.trim().parse::<f64>() {
            Ok(parsed) => Ok(Value::Float(parsed)),
            Err(_) => {
                let text = text.to_owned();
                Err(self.error(site, format_args!("cannot convert {text:?} to float")))
            }
        }
    }

    /// The tag name: `int`, `string`, `instance`, ...
    pub fn builtin_type(&mut self, arguments: &[Value], site: &SourceLocation) -> RtResult<Value> {
        self.expect_arguments("type", arguments, 1, site)?;
        self.string(arguments[0].tag().to_string())
    }

    pub fn builtin_keys(&mut self, arguments: &[Value], site: &SourceLocation) -> RtResult<Value> {
        self.expect_arguments("keys", arguments, 1, site)?;
        self.dict_keys(arguments[0], site)
    }

    pub fn builtin_append(&mut self, arguments: &[Value], site: &SourceLocation) -> RtResult<Value> {
        self.expect_arguments("append", arguments, 2, site)?;

        match arguments[0] {
            Value::Array(array) => {
                self.array_push(array, arguments[1])?;
                Ok(Value::Null)
            }
            other => Err(self.error(
                site,
                format_args!("append expects an array, not {}", other.tag()),
            )),
        }
    }

    pub fn builtin_has_key(&mut self, arguments: &[Value], site: &SourceLocation) -> RtResult<Value> {
        self.expect_arguments("has_key", arguments, 2, site)?;

        match arguments[0] {
            Value::Dict(dict) => {
                let key = self.dict_key(arguments[1], site)?;
                Ok(Value::Bool(self.dict(dict).contains_key(&key)))
            }
            other => Err(self.error(
                site,
                format_args!("has_key expects a dict, not {}", other.tag()),
            )),
        }
    }

    /// One line of input, `null` at end of input
    pub fn builtin_input(&mut self, arguments: &[Value], site: &SourceLocation) -> RtResult<Value> {
        self.expect_arguments("input", arguments, 0, site)?;

        match self.read_line()? {
            Some(line) => self.string(line),
            None => Ok(Value::Null),
        }
    }

    /// The process arguments as an array of strings
    pub fn builtin_args(&mut self, arguments: &[Value], site: &SourceLocation) -> RtResult<Value> {
        self.expect_arguments("args", arguments, 0, site)?;

        let array = self.allocate_array(&[])?;
        self.frame(&[Value::Array(array)], |rt| {
            for argument in rt.arguments.clone() {
                let argument = rt.string(argument)?;
                rt.array_push(array, argument)?;
            }
            Ok(Value::Array(array))
        })
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use crate::{
        frontend::SourceLocation,
        runtime::{
            Runtime,
            ops::Operator,
            tests::{Captured, runtime},
            value::Value,
        },
    };

    fn site() -> SourceLocation {
        SourceLocation::new("main.em", 1)
    }

    fn string(rt: &mut Runtime, text: &str) -> Value {
        rt.string(text).unwrap()
    }

    fn array(rt: &mut Runtime, elements: &[Value]) -> Value {
        rt.array_new(elements).unwrap()
    }

    #[test]
    fn falsy_values_are_exactly_the_empty_ones() {
        let mut rt = runtime();
        let empty_string = string(&mut rt, "");
        let empty_array = array(&mut rt, &[]);
        let empty_dict = rt.dict_new().unwrap();

        for value in [Value::Int(0), Value::Float(0.0), empty_string, empty_array, empty_dict, Value::Null] {
            assert!(!rt.truthy(value), "{value:?}");
        }

        let text = string(&mut rt, "0");
        let nested = array(&mut rt, &[Value::Null]);
        let class = rt.class_new("C").unwrap();
        for value in [Value::Int(-1), Value::Float(0.5), text, nested, class, Value::Bool(true)] {
            assert!(rt.truthy(value), "{value:?}");
        }
        assert!(!rt.truthy(Value::Bool(false)));
    }

    #[test]
    fn membership_covers_strings_arrays_and_dicts() {
        let mut rt = runtime();
        let haystack = string(&mut rt, "xabz");
        let needle = string(&mut rt, "ab");
        let numbers = array(&mut rt, &[Value::Int(1), Value::Int(2), Value::Int(3)]);

        assert_eq!(rt.contains(haystack, needle, &site()).unwrap(), Value::Bool(true));
        assert_eq!(rt.contains(numbers, Value::Int(3), &site()).unwrap(), Value::Bool(true));
        assert_eq!(rt.contains(numbers, Value::Float(2.0), &site()).unwrap(), Value::Bool(true));
        assert_eq!(rt.contains(numbers, Value::Int(4), &site()).unwrap(), Value::Bool(false));

        let dict = rt.dict_new().unwrap();
        let key = string(&mut rt, "7");
        rt.index_set(dict, Value::Int(7), Value::Null, &site()).unwrap();
        let missing = string(&mut rt, "8");

        for candidate in [key, Value::Int(7), missing, Value::Int(8)] {
            let contained = rt.contains(dict, candidate, &site()).unwrap();
            let has_key = rt.builtin_has_key(&[dict, candidate], &site()).unwrap();
            assert_eq!(contained, has_key);
        }
    }

    #[test]
    fn negated_membership_runs_through_contains() {
        use crate::{
            backend::interpreter::tests::{execute, output},
            frontend::ast::{BinaryOperatorKind::NotIn, testing as program},
            runtime::RuntimeError,
        };

        let printed = output(vec![
            program::var(1, "xs", program::array(vec![program::int(1), program::int(2), program::int(3)])),
            program::var(2, "d", program::dict(vec![(program::string("7"), program::null())])),
            program::expr(
                3,
                program::call(
                    "print",
                    vec![
                        program::binary(program::int(3), NotIn, program::ident("xs")),
                        program::binary(program::int(5), NotIn, program::ident("xs")),
                        program::binary(program::int(7), NotIn, program::ident("d")),
                        program::binary(program::string("8"), NotIn, program::ident("d")),
                        program::binary(program::string("ell"), NotIn, program::string("hello")),
                    ],
                ),
            ),
        ]);
        assert_eq!(printed, "false true false true false\n");

        let (outcome, _, _) = execute(vec![program::expr(
            4,
            program::binary(program::int(1), NotIn, program::string("hello")),
        )]);
        assert_eq!(
            outcome,
            Err(RuntimeError::Uncaught {
                site: "main.em:4".into(),
                message: "main.em:4: 'in <string>' requires a string, not int".into()
            })
        );
    }

    #[test]
    fn arithmetic_promotes_and_concatenates() {
        let mut rt = runtime();
        let at = site();

        assert_eq!(rt.binary_op(Operator::Add, Value::Int(2), Value::Int(3), &at).unwrap(), Value::Int(5));
        assert_eq!(rt.binary_op(Operator::Divide, Value::Int(7), Value::Int(2), &at).unwrap(), Value::Int(3));
        assert_eq!(
            rt.binary_op(Operator::Multiply, Value::Int(2), Value::Float(1.5), &at).unwrap(),
            Value::Float(3.0)
        );
        assert_eq!(rt.binary_op(Operator::Less, Value::Int(1), Value::Float(1.5), &at).unwrap(), Value::Bool(true));

        let a = string(&mut rt, "a");
        let joined = rt.binary_op(Operator::Add, a, Value::Int(1), &at).unwrap();
        assert_eq!(rt.text(joined), Some("a1"));

        let repeated = rt.binary_op(Operator::Multiply, a, Value::Int(3), &at).unwrap();
        assert_eq!(rt.text(repeated), Some("aaa"));

        let b = string(&mut rt, "b");
        assert_eq!(rt.binary_op(Operator::Less, a, b, &at).unwrap(), Value::Bool(true));
        assert_eq!(rt.binary_op(Operator::Or, Value::Null, b, &at).unwrap(), Value::Bool(true));
    }

    #[test]
    fn equality_is_identity_for_containers() {
        let mut rt = runtime();
        let first = array(&mut rt, &[Value::Int(1)]);
        let second = array(&mut rt, &[Value::Int(1)]);
        let x = string(&mut rt, "x");
        let y = string(&mut rt, "x");

        assert!(!rt.values_equal(first, second));
        assert!(rt.values_equal(first, first));
        assert!(rt.values_equal(x, y));
        assert!(rt.values_equal(Value::Int(1), Value::Float(1.0)));
        assert!(!rt.values_equal(Value::Null, Value::Int(0)));
    }

    #[test]
    fn slices_accept_null_and_negative_bounds() {
        let mut rt = runtime();
        let at = site();
        let text = string(&mut rt, "abcdef");

        let tail = rt.slice(text, Value::Int(-2), Value::Null, &at).unwrap();
        assert_eq!(rt.text(tail), Some("ef"));

        let head = rt.slice(text, Value::Null, Value::Int(2), &at).unwrap();
        assert_eq!(rt.text(head), Some("ab"));

        let empty = rt.slice(text, Value::Int(4), Value::Int(1), &at).unwrap();
        assert_eq!(rt.text(empty), Some(""));

        let numbers = array(&mut rt, &[Value::Int(1), Value::Int(2), Value::Int(3)]);
        let middle = rt.slice(numbers, Value::Int(1), Value::Int(-1), &at).unwrap();
        assert_eq!(rt.array_elements(middle.address().unwrap()), vec![Value::Int(2)]);
    }

    #[test]
    fn indexing_checks_bounds_and_keys() {
        let mut rt = runtime();
        let at = site();
        let numbers = array(&mut rt, &[Value::Int(10), Value::Int(20)]);

        assert_eq!(rt.index_get(numbers, Value::Int(1), &at).unwrap(), Value::Int(20));
        rt.index_set(numbers, Value::Int(0), Value::Bool(true), &at).unwrap();
        assert_eq!(rt.index_get(numbers, Value::Int(0), &at).unwrap(), Value::Bool(true));
        assert!(rt.index_get(numbers, Value::Int(2), &at).is_err());

        let dict = rt.dict_new().unwrap();
        let key = string(&mut rt, "k");
        rt.index_set(dict, key, Value::Int(5), &at).unwrap();
        assert_eq!(rt.index_get(dict, key, &at).unwrap(), Value::Int(5));
        assert!(rt.index_get(dict, Value::Int(5), &at).is_err());
    }

    #[test]
    fn dict_keys_visit_every_key_once() {
        let mut rt = runtime();
        let at = site();
        let dict = rt.dict_new().unwrap();
        for i in 0..40 {
            rt.index_set(dict, Value::Int(i), Value::Int(i * i), &at).unwrap();
        }

        let keys = rt.dict_keys(dict, &at).unwrap();
        let mut seen: Vec<i64> = rt
            .array_elements(keys.address().unwrap())
            .into_iter()
            .map(|key| rt.text(key).unwrap().parse().unwrap())
            .collect();
        seen.sort();

        assert_eq!(seen, (0..40).collect::<Vec<_>>());
        for key in rt.array_elements(keys.address().unwrap()) {
            let value = rt.index_get(dict, key, &at).unwrap();
            let expected = rt.text(key).unwrap().parse::<i64>().unwrap();
            assert_eq!(value, Value::Int(expected * expected));
        }
    }

    #[test]
    fn display_quotes_nested_strings() {
        let mut rt = runtime();
        let text = string(&mut rt, "a");
        let inner = array(&mut rt, &[text, Value::Float(2.0), Value::Null]);
        let outer = array(&mut rt, &[inner, Value::Bool(false)]);

        assert_eq!(rt.display(outer), "[[\"a\", 2.0, null], false]");
        assert_eq!(rt.display(text), "a");

        rt.builtin_append(&[outer, outer], &site()).unwrap();
        assert_eq!(rt.display(outer), "[[\"a\", 2.0, null], false, [...]]");
    }

    #[test]
    fn builtins_convert_and_report() {
        let mut rt = runtime();
        let at = site();
        let output = Captured::default();
        rt.set_output(Box::new(output.clone()));
        rt.set_input(Box::new(Cursor::new("first line\n")));
        rt.set_args(["prog".to_owned(), "-v".to_owned()]);

        let number = string(&mut rt, " 42 ");
        assert_eq!(rt.builtin_int(&[number], &at).unwrap(), Value::Int(42));
        assert_eq!(rt.builtin_int(&[Value::Float(3.9)], &at).unwrap(), Value::Int(3));
        assert_eq!(rt.builtin_float(&[Value::Int(2)], &at).unwrap(), Value::Float(2.0));

        let name = rt.builtin_type(&[Value::Null], &at).unwrap();
        assert_eq!(rt.text(name), Some("null"));

        let text = rt.builtin_str(&[Value::Int(7)], &at).unwrap();
        assert_eq!(rt.builtin_len(&[text], &at).unwrap(), Value::Int(1));

        rt.builtin_print(&[text, Value::Bool(true), Value::Null], &at).unwrap();
        assert_eq!(output.text(), "7 true null\n");

        let line = rt.builtin_input(&[], &at).unwrap();
        assert_eq!(rt.text(line), Some("first line"));
        assert_eq!(rt.builtin_input(&[], &at).unwrap(), Value::Null);

        let args = rt.builtin_args(&[], &at).unwrap();
        assert_eq!(rt.display(args), "[\"prog\", \"-v\"]");

        assert!(rt.builtin_len(&[], &at).is_err());
    }
}
