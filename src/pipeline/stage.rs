//! The stage abstraction driven by [`StageRunner`](crate::pipeline::runner::StageRunner).

use crate::pipeline::error::StageError;
use std::marker::PhantomData;

/// Lazily produced outputs of one `process` call.
///
/// The runner pulls items one by one and forwards each as soon as ordering
/// allows, so a stage can emit its first result before computing the rest.
/// An `Err` item aborts the pipeline.
pub type Outputs<'a, T> = Box<dyn Iterator<Item = Result<T, StageError>> + 'a>;

/// A processing stage in the pipeline.
///
/// `process` takes `&self` because the runner may call it from several
/// worker threads at once; stages keep mutable state behind their own locks.
pub trait Stage: Send + Sync + 'static {
    /// The input type this stage receives.
    type Input: Send + 'static;
    /// The output type this stage produces.
    type Output: Send + 'static;

    /// Returns the name of this stage for logging and error reporting.
    fn name(&self) -> &'static str;

    /// One-time initialization before the first input.
    ///
    /// Stages receive their configuration at construction; this is where they
    /// verify that required resources exist. An error here is fatal.
    fn setup(&mut self) -> Result<(), StageError> {
        Ok(())
    }

    /// Produces the outputs for one input. May yield nothing.
    fn process(&self, input: Self::Input) -> Outputs<'_, Self::Output>;

    /// Called once after the last worker finished.
    fn shutdown(&self) {}
}

/// Outputs consisting of a single item.
pub fn single<'a, T: 'a>(output: T) -> Outputs<'a, T> {
    Box::new(std::iter::once(Ok(output)))
}

/// Outputs consisting of nothing.
pub fn empty<'a, T: 'a>() -> Outputs<'a, T> {
    Box::new(std::iter::empty())
}

/// Outputs that fail immediately.
pub fn failed<'a, T: 'a>(error: StageError) -> Outputs<'a, T> {
    Box::new(std::iter::once(Err(error)))
}

/// Stage built from a closure. Handy for glue stages and tests.
pub struct FnStage<I, O, F> {
    name: &'static str,
    f: F,
    _marker: PhantomData<fn(I) -> O>,
}

impl<I, O, F> FnStage<I, O, F>
where
    F: Fn(I) -> Outputs<'static, O>,
{
    pub fn new(name: &'static str, f: F) -> Self {
        Self {
            name,
            f,
            _marker: PhantomData,
        }
    }
}

impl<I, O, F> Stage for FnStage<I, O, F>
where
    I: Send + 'static,
    O: Send + 'static,
    F: Fn(I) -> Outputs<'static, O> + Send + Sync + 'static,
{
    type Input = I;
    type Output = O;

    fn name(&self) -> &'static str {
        self.name
    }

    fn process(&self, input: I) -> Outputs<'_, O> {
        (self.f)(input)
    }
}
