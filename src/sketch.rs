//! The mergeable computation contracts run by datasets.
//!
//! A [`Sketch`] summarizes one partition with `create` and combines summaries
//! with `add`. `add` must be associative and commutative, and `zero()` must be
//! its identity, so any partitioning and any merge order give the same answer
//! within the algorithm's error bound.
//!
//! A [`Map`] turns one partition into another value, producing a new dataset
//! with the same shape.
//!
//! Both may `describe` themselves as an [`OpSpec`]; only operations that can
//! describe themselves can be shipped to a remote worker.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Serializable name and parameters of an operation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OpSpec {
    pub name: String,
    pub params: serde_json::Value,
}

impl OpSpec {
    /// Describe an operation by its registered name and serialized fields.
    pub fn of<P: Serialize>(name: &str, params: &P) -> Result<Self> {
        Ok(Self {
            name: name.to_string(),
            params: serde_json::to_value(params)?,
        })
    }

    /// Rebuild the operation from its parameters.
    pub fn decode<P: DeserializeOwned>(&self) -> Result<P> {
        Ok(serde_json::from_value(self.params.clone())?)
    }
}

/// Operations a worker can rebuild from their serialized fields.
///
/// Implementors usually answer `describe` with [`Remotable::spec`].
pub trait Remotable: Serialize + DeserializeOwned + Send + Sync + 'static {
    const NAME: &'static str;

    /// Name the worker's handler is registered under.
    fn registered_name() -> String {
        Self::NAME.to_string()
    }

    fn spec(&self) -> Result<OpSpec> {
        OpSpec::of(&Self::registered_name(), self)
    }
}

pub trait Sketch<T>: Send + Sync + 'static {
    type Output: Clone + Send + Serialize + DeserializeOwned + 'static;

    /// Identity of `add`.
    fn zero(&self) -> Self::Output;

    /// Summarize one partition.
    fn create(&self, data: &T) -> Result<Self::Output>;

    /// Combine two summaries.
    fn add(&self, left: &Self::Output, right: &Self::Output) -> Result<Self::Output>;

    fn describe(&self) -> Result<OpSpec> {
        Err(Error::NotRemotable(std::any::type_name::<Self>().to_string()))
    }
}

pub trait Map<T>: Send + Sync + 'static {
    type Output: Send + Sync + 'static;

    fn apply(&self, data: &T) -> Result<Self::Output>;

    fn describe(&self) -> Result<OpSpec> {
        Err(Error::NotRemotable(std::any::type_name::<Self>().to_string()))
    }
}

/// Adapter running a closure as a local-only [`Map`].
pub struct MapFn<F>(pub F);

impl<T, O, F> Map<T> for MapFn<F>
where
    F: Fn(&T) -> Result<O> + Send + Sync + 'static,
    O: Send + Sync + 'static,
{
    type Output = O;

    fn apply(&self, data: &T) -> Result<O> {
        (self.0)(data)
    }
}

/// Fold a sequence of summaries with `add`, starting from `zero()`.
pub fn add_all<T, S, I>(sketch: &S, results: I) -> Result<S::Output>
where
    S: Sketch<T> + ?Sized,
    I: IntoIterator<Item = S::Output>,
{
    results
        .into_iter()
        .try_fold(sketch.zero(), |acc, r| sketch.add(&acc, &r))
}

/// Convert a result into a language-neutral tree of numbers, strings, lists
/// and maps.
pub fn to_json_tree<R: Serialize>(result: &R) -> Result<serde_json::Value> {
    Ok(serde_json::to_value(result)?)
}
