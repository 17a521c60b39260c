//! Core step trait and closure-based steps.
//!
//! This module defines the [`Step`] trait, the building block every stage of
//! the workflow implements, along with [`LambdaStep`] for closure-based steps
//! and [`BoxedStepExt`] for wrapping steps fluently.

use async_trait::async_trait;
use serde::Serialize;
use std::future::Future;
use std::marker::PhantomData;

use crate::instrumented::InstrumentedStep;
use crate::span::SpanKind;
use crate::{ExecutionContext, Result};

/// The fundamental trait for async workflow steps.
///
/// Each step receives the run's execution context (for spans, metrics and
/// events) and typed input, and produces typed output or an error.
///
/// # Example
///
/// ```rust
/// use guardrail_workflow::{Step, ExecutionContext, LambdaStep};
///
/// # tokio_test::block_on(async {
/// let shout = LambdaStep::new(|s: String| async move {
///     Ok::<String, guardrail_workflow::Error>(s.to_uppercase())
/// });
/// let ctx = ExecutionContext::new();
/// assert_eq!(shout.run(&ctx, "hey".to_string()).await.unwrap(), "HEY");
/// # });
/// ```
#[async_trait]
pub trait Step: Send + Sync {
    /// The input type for this step.
    type Input: Send;
    /// The output type produced by this step.
    type Output: Send;

    /// Execute this step with the provided context and input.
    async fn run(&self, ctx: &ExecutionContext, input: Self::Input) -> Result<Self::Output>;

    /// Returns a human-readable name for this step. Defaults to the type name.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// A step constructed from a closure or function pointer.
///
/// The type parameters `I` and `O` encode the input and output types,
/// while `F` is the concrete closure type.
pub struct LambdaStep<I, O, F> {
    /// The underlying closure.
    pub f: F,
    _phantom: PhantomData<fn(I) -> O>,
}

impl<I, O, F, Fut> LambdaStep<I, O, F>
where
    F: Fn(I) -> Fut + Send + Sync + 'static,
    I: Send + 'static,
    O: Send + 'static,
    Fut: Future<Output = Result<O>> + Send + 'static,
{
    /// Create a new `LambdaStep` from the given closure.
    pub fn new(f: F) -> Self {
        Self {
            f,
            _phantom: PhantomData,
        }
    }
}

#[async_trait]
impl<F, I, O, Fut> Step for LambdaStep<I, O, F>
where
    F: Fn(I) -> Fut + Send + Sync + 'static,
    I: Send + 'static,
    O: Send + 'static,
    Fut: Future<Output = Result<O>> + Send + 'static,
{
    type Input = I;
    type Output = O;

    async fn run(&self, _ctx: &ExecutionContext, input: I) -> Result<O> {
        (self.f)(input).await
    }
}

/// Extension trait providing fluent wrapping methods for all [`Step`] implementors.
pub trait BoxedStepExt: Step + Sized {
    /// Wrap this step in a span named `name` of the given kind.
    ///
    /// # Example
    ///
    /// ```rust
    /// use guardrail_workflow::{LambdaStep, BoxedStepExt, SpanKind};
    ///
    /// let step = LambdaStep::new(|x: i32| async move { Ok::<i32, guardrail_workflow::Error>(x + 1) })
    ///     .instrumented("Increment", SpanKind::Chain);
    /// ```
    fn instrumented(self, name: impl Into<String>, kind: SpanKind) -> InstrumentedStep<Self>
    where
        Self::Input: Serialize + 'static,
        Self::Output: Serialize + 'static,
    {
        InstrumentedStep::new(self, name).with_kind(kind)
    }

    /// Erase the concrete step type, returning a trait object.
    fn boxed(self) -> Box<dyn Step<Input = Self::Input, Output = Self::Output> + Send + Sync>
    where
        Self: 'static,
    {
        Box::new(self)
    }
}

impl<T: Step + Sized> BoxedStepExt for T {}

// Boxed steps are steps too, so they can be wrapped and stored uniformly.
#[async_trait]
impl<I, O> Step for Box<dyn Step<Input = I, Output = O> + Send + Sync>
where
    I: Send + 'static,
    O: Send + 'static,
{
    type Input = I;
    type Output = O;

    async fn run(&self, ctx: &ExecutionContext, input: I) -> Result<O> {
        (**self).run(ctx, input).await
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}
