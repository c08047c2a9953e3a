//! Checkpoints and raising.
//!
//! A raise that finds a checkpoint consumes it on the spot, restoring the root
//! and machine stacks to the depths recorded at `try_push`, and travels up
//! as [`Unwind::Raise`] to the code that pushed it. With no checkpoint left
//! the exception is fatal.

use crate::frontend::SourceLocation;

use super::{
    Runtime,
    error::{RtResult, RuntimeError, Unwind},
    ops::Operator,
    value::Value,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Checkpoint {
    roots: usize,
    stack: usize,
}

impl Runtime {
    pub fn try_push(&mut self) {
        self.checkpoints.push(Checkpoint {
            roots: self.roots.depth(),
            stack: self.stack.depth(),
        });
    }

    /// Drops the innermost checkpoint once its protected region completes
    pub fn try_pop(&mut self) {
        self.checkpoints.pop();
    }

    pub fn try_depth(&self) -> usize {
        self.checkpoints.len()
    }

    /// The value carried by the most recent raise, `null` if none
    pub fn current_exception(&self) -> Value {
        self.exception.unwrap_or(Value::Null)
    }

    /// Starts unwinding with `value`. The result is meant to be returned as
    /// the `Err` of the raising operation.
    pub fn raise(&mut self, value: Value, site: &SourceLocation) -> Unwind {
        match self.checkpoints.pop() {
            Some(Checkpoint { roots, stack }) => {
                log::trace!("raise at {site} unwinds to root depth {roots}");
                self.roots.truncate(roots);
                self.stack.truncate(stack);
                self.exception = Some(value);
                Unwind::Raise(value)
            }
            None => Unwind::Fatal(RuntimeError::Uncaught {
                site: site.to_string(),
                message: self.display(value),
            }),
        }
    }

    /// Raises a string reading `file:line: message`
    pub fn error(&mut self, site: &SourceLocation, message: impl core::fmt::Display) -> Unwind {
        match self.string(format!("{site}: {message}")) {
            Ok(text) => self.raise(text, site),
            Err(unwind) => unwind,
        }
    }

    /// `try { body } catch (e) { handler }`: the handler receives the raised
    /// value's text behind a `[caught in file:line] ` prefix naming `site`
    pub fn try_catch<T>(
        &mut self,
        site: &SourceLocation,
        body: impl FnOnce(&mut Self) -> RtResult<T>,
        handler: impl FnOnce(&mut Self, Value) -> RtResult<T>,
    ) -> RtResult<T> {
        self.try_push();

        match body(self) {
            Ok(result) => {
                self.try_pop();
                Ok(result)
            }
            Err(Unwind::Raise(exception)) => {
                let decorated = self.frame(&[exception], |rt| {
                    let prefix = rt.string(format!("[caught in {site}] "))?;
                    rt.binary_op(Operator::Add, prefix, exception, site)
                })?;
                handler(self, decorated)
            }
            Err(fatal) => Err(fatal),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        frontend::SourceLocation,
        runtime::{
            RuntimeError, Unwind,
            tests::runtime,
            value::Value,
        },
    };

    fn at(line: u32) -> SourceLocation {
        SourceLocation::new("main.em", line)
    }

    #[test]
    fn caught_messages_name_the_handler_site() {
        let mut rt = runtime();

        let message = rt
            .try_catch(
                &at(3),
                |rt| {
                    let boom = rt.string("boom")?;
                    Err(rt.raise(boom, &at(4)))
                },
                |rt, caught| Ok(rt.text(caught).map(str::to_owned)),
            )
            .unwrap();

        assert_eq!(message.as_deref(), Some("[caught in main.em:3] boom"));
        assert_eq!(rt.try_depth(), 0);
    }

    #[test]
    fn non_string_exceptions_are_stringified() {
        let mut rt = runtime();

        let message = rt
            .try_catch(
                &at(1),
                |rt| Err(rt.raise(Value::Int(42), &at(2))),
                |rt, caught| Ok(rt.display(caught)),
            )
            .unwrap();

        assert_eq!(message, "[caught in main.em:1] 42");
        assert_eq!(rt.current_exception(), Value::Int(42));
    }

    #[test]
    fn rethrown_exceptions_reach_the_outer_handler() {
        let mut rt = runtime();

        let message = rt
            .try_catch(
                &at(1),
                |rt| {
                    rt.try_catch(
                        &at(2),
                        |rt| {
                            let boom = rt.string("boom")?;
                            Err(rt.raise(boom, &at(3)))
                        },
                        |rt, caught| Err(rt.raise(caught, &at(4))),
                    )
                },
                |rt, caught| Ok(rt.display(caught)),
            )
            .unwrap();

        assert_eq!(message, "[caught in main.em:1] [caught in main.em:2] boom");
    }

    #[test]
    fn unwinding_restores_the_root_stack() {
        let mut rt = runtime();
        let slot = rt.new_slot();
        rt.push_root(slot).unwrap();

        rt.try_catch(
            &at(1),
            |rt| {
                rt.push_root(slot)?;
                rt.push_root(slot)?;
                rt.machine_stack().push_word(99);
                Err(rt.raise(Value::Null, &at(2)))
            },
            |_, _| Ok(()),
        )
        .unwrap();

        assert_eq!(rt.root_depth(), 1);
        assert!(rt.machine_stack().scan().is_empty());
    }

    #[test]
    fn raising_without_a_checkpoint_is_fatal() {
        let mut rt = runtime();
        let boom = rt.string("boom").unwrap();

        assert_eq!(
            rt.raise(boom, &at(7)),
            Unwind::Fatal(RuntimeError::Uncaught {
                site: "main.em:7".into(),
                message: "boom".into()
            })
        );
    }

    #[test]
    fn operator_errors_are_catchable() {
        let mut rt = runtime();

        let message = rt
            .try_catch(
                &at(1),
                |rt| {
                    rt.binary_op(crate::runtime::ops::Operator::Divide, Value::Int(1), Value::Int(0), &at(5))
                        .map(|_| String::new())
                },
                |rt, caught| Ok(rt.display(caught)),
            )
            .unwrap();

        assert_eq!(message, "[caught in main.em:1] main.em:5: division by zero");
    }
}
