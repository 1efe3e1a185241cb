//! Ordered handlers where the first one that produces a value wins.
//!
//! Each handler either passes (does not apply), returns a value, or
//! rejects with an error. The chain stops at the first return; what is
//! raised when nothing returns depends on [`ChainBehavior`].

use std::ops::ControlFlow;

use crate::error::{Error, Result};

/// Result of offering input to one handler.
#[derive(Debug)]
pub enum Outcome<T> {
    /// The handler does not apply.
    Pass,
    /// The handler produced a value; the chain stops.
    Return(T),
    /// The handler applied and failed.
    Reject(Error),
}

/// What the chain raises when no handler returns a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainBehavior {
    /// Stop at the first rejection and raise it.
    Halt,
    /// Try every handler, then raise the first rejection.
    ThrowFirst,
    /// Try every handler, then raise the last rejection.
    ThrowLast,
    /// Try every handler, then raise every rejection.
    ThrowCollected,
}

/// Accumulates outcomes for one run of a chain.
///
/// Drive it by feeding each handler's outcome to [`offer`](Self::offer)
/// until it breaks, then call [`finish`](Self::finish) if it never did.
#[derive(Debug)]
pub struct ReturningChain {
    name: &'static str,
    behavior: ChainBehavior,
    errors: Vec<Error>,
}

impl ReturningChain {
    /// A chain named `name` (used in the "no suitable handler" error).
    #[must_use]
    pub fn new(name: &'static str, behavior: ChainBehavior) -> Self {
        Self {
            name,
            behavior,
            errors: Vec::new(),
        }
    }

    /// Record one handler's outcome. Breaks with the final result when the
    /// chain must stop.
    pub fn offer<T>(&mut self, outcome: Outcome<T>) -> ControlFlow<Result<T>> {
        match outcome {
            Outcome::Pass => ControlFlow::Continue(()),
            Outcome::Return(value) => ControlFlow::Break(Ok(value)),
            Outcome::Reject(error) if self.behavior == ChainBehavior::Halt => {
                ControlFlow::Break(Err(error))
            }
            Outcome::Reject(error) => {
                tracing::debug!(chain = self.name, error = %error, "handler rejected");
                self.errors.push(error);
                ControlFlow::Continue(())
            }
        }
    }

    /// Result when every handler has been offered without one returning.
    pub fn finish<T>(mut self) -> Result<T> {
        if self.errors.is_empty() {
            return Err(Error::NoSuitableTransport(format!(
                "no {} handler accepted the request",
                self.name
            )));
        }
        let last = self.errors.len() - 1;
        let error = match self.behavior {
            ChainBehavior::ThrowLast => self.errors.swap_remove(last),
            ChainBehavior::ThrowCollected if last > 0 => Error::Aggregate(self.errors),
            _ => self.errors.swap_remove(0),
        };
        Err(error)
    }

    /// Run `outcomes` through the chain in order.
    pub fn run<T>(mut self, outcomes: impl IntoIterator<Item = Outcome<T>>) -> Result<T> {
        for outcome in outcomes {
            if let ControlFlow::Break(result) = self.offer(outcome) {
                return result;
            }
        }
        self.finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn reject(reason: &str) -> Outcome<u32> {
        Outcome::Reject(Error::InvalidArgument(reason.to_string()))
    }

    fn message(result: Result<u32>) -> String {
        result.unwrap_err().to_string()
    }

    #[test]
    fn test_first_return_wins() {
        let chain = ReturningChain::new("test", ChainBehavior::ThrowLast);
        let result = chain.run([Outcome::Pass, reject("a"), Outcome::Return(7), Outcome::Return(8)]);
        assert_eq!(result.unwrap(), 7);
    }

    #[test]
    fn test_all_pass_is_no_suitable_handler() {
        let chain = ReturningChain::new("transport", ChainBehavior::ThrowLast);
        let err = chain.run::<u32>([Outcome::Pass, Outcome::Pass]).unwrap_err();
        assert!(matches!(err, Error::NoSuitableTransport(_)));
        assert!(err.to_string().contains("transport"));
    }

    #[test]
    fn test_halt_stops_at_first_rejection() {
        let chain = ReturningChain::new("test", ChainBehavior::Halt);
        let result = chain.run([reject("a"), Outcome::Return(1)]);
        assert!(message(result).contains('a'));
    }

    #[test]
    fn test_throw_first_and_last() {
        let first = ReturningChain::new("test", ChainBehavior::ThrowFirst);
        assert!(message(first.run([reject("first"), reject("second")])).contains("first"));

        let last = ReturningChain::new("test", ChainBehavior::ThrowLast);
        assert!(message(last.run([reject("first"), reject("second")])).contains("second"));
    }

    #[test]
    fn test_throw_collected() {
        let single = ReturningChain::new("test", ChainBehavior::ThrowCollected);
        let err = single.run([Outcome::Pass, reject("only")]).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));

        let many = ReturningChain::new("test", ChainBehavior::ThrowCollected);
        let err = many.run([reject("a"), reject("b")]).unwrap_err();
        match err {
            Error::Aggregate(errors) => assert_eq!(errors.len(), 2),
            other => panic!("expected aggregate, got {other}"),
        }
    }

    #[test]
    fn test_return_after_rejection_discards_errors() {
        let mut chain = ReturningChain::new("test", ChainBehavior::ThrowCollected);
        assert!(chain.offer(reject("a")).is_continue());
        match chain.offer(Outcome::Return(3)) {
            ControlFlow::Break(result) => assert_eq!(result.unwrap(), 3),
            ControlFlow::Continue(()) => panic!("chain should stop"),
        }
    }
}
