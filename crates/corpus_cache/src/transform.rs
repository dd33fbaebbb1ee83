//! src/transform.rs
//!
//! Composable per-document processing stages.

use anyhow::{Context, Result};
use std::marker::PhantomData;

/// A stateless stage converting one input of type `I` into one output `O`.
///
/// Stages are pure with respect to their input: the corpus pipeline applies
/// them to many documents in parallel, so implementations must be
/// `Send + Sync`. A filtering stage uses `O = Option<T>` (zero-or-one output).
///
/// Two stages compose with [`Transform::then`] when the output of the first is
/// the input of the second:
/// ```ignore
/// let stage = Encoder::new(tokenizer).then(MinSentenceFilter::default());
/// let kept: Option<EncodedDocument> = stage.apply(raw_doc)?;
/// ```
pub trait Transform<I, O>: Send + Sync {
    fn apply(&self, input: I) -> Result<O>;

    #[inline]
    fn then<T, M>(self, next: T) -> Chain<Self, T, O>
    where
        Self: Sized,
        T: Transform<O, M>,
        O: Send,
        M: Send,
    {
        Chain::new(self, next)
    }
}

/// Two stages run back to back (`A` then `B`).
#[derive(Debug)]
pub struct Chain<A, B, M> {
    first: A,
    second: B,
    _marker: PhantomData<fn() -> M>,
}

impl<A, B, M> Chain<A, B, M> {
    pub fn new(first: A, second: B) -> Self {
        Self {
            first,
            second,
            _marker: PhantomData,
        }
    }
}

impl<I, M, O, A, B> Transform<I, O> for Chain<A, B, M>
where
    A: Transform<I, M>,
    B: Transform<M, O>,
    M: Send,
{
    fn apply(&self, input: I) -> Result<O> {
        let mid = self.first.apply(input)?;
        self.second.apply(mid).with_context(|| {
            format!(
                "stage {} failed after {}",
                std::any::type_name::<B>(),
                std::any::type_name::<A>()
            )
        })
    }
}

/// Borrowed stages are stages too, so a pipeline can hold `&Encoder`.
impl<I, O, T> Transform<I, O> for &T
where
    T: Transform<I, O> + ?Sized,
{
    fn apply(&self, input: I) -> Result<O> {
        (**self).apply(input)
    }
}
