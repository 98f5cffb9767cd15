//! First-success evaluation of ordered fallback chains
//!
//! Several operations try a list of strategies in order and keep the first
//! one that produces a value: reading the current branch, listing remote
//! branches, finding the remote default, cloning. Each chain is written as
//! data (named steps) and evaluated here, so the order is visible in one
//! place and every skipped step is logged the same way.

use std::future::Future;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;

use crate::error::{EngineError, Result};

type StepFn<'a, T> = Box<dyn FnOnce() -> BoxFuture<'a, Result<Option<T>>> + Send + 'a>;

struct Step<'a, T> {
    name: &'static str,
    run: StepFn<'a, T>,
}

/// An ordered chain of named attempts.
///
/// A step yields `Ok(Some(value))` to win, `Ok(None)` to pass, or an error,
/// which is recorded and also passes to the next step.
pub struct FirstSuccess<'a, T> {
    label: &'static str,
    steps: Vec<Step<'a, T>>,
}

impl<'a, T: Send + 'a> FirstSuccess<'a, T> {
    pub fn new(label: &'static str) -> Self {
        Self {
            label,
            steps: Vec::new(),
        }
    }

    /// Append a step. Steps run lazily and in insertion order.
    pub fn then<F, Fut>(mut self, name: &'static str, step: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'a,
        Fut: Future<Output = Result<Option<T>>> + Send + 'a,
    {
        self.steps.push(Step {
            name,
            run: Box::new(move || step().boxed()),
        });
        self
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Run the chain and report which step won.
    ///
    /// With no winner, the first recorded error is returned; if no step
    /// failed the result is `Ok(None)`.
    pub async fn run_named(self) -> Result<Option<(&'static str, T)>> {
        let mut first_error: Option<EngineError> = None;

        for step in self.steps {
            match (step.run)().await {
                Ok(Some(value)) => {
                    tracing::debug!("{}: resolved by '{}'", self.label, step.name);
                    return Ok(Some((step.name, value)));
                }
                Ok(None) => {
                    tracing::trace!("{}: '{}' yielded nothing", self.label, step.name);
                }
                Err(e) => {
                    tracing::debug!("{}: '{}' failed: {}", self.label, step.name, e);
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(None),
        }
    }

    pub async fn run(self) -> Result<Option<T>> {
        Ok(self.run_named().await?.map(|(_, value)| value))
    }
}
