#![forbid(unsafe_code)]

//! Transparent test doubles over an interceptable object model.
//!
//! [`factory()`] wraps a value in a proxy driven by a [`Mock`] engine. The
//! wrapper behaves like the wrapped value while the engine records every
//! call, construction, property read and write, lets tests install stub
//! implementations, and wraps nested values on the way out so whole object
//! graphs are observable.

pub mod call;
pub mod factory;
pub mod mock;
pub mod object_model;
pub mod options;
pub mod proxy;

pub use call::Call;
pub use factory::{Moxy, factory};
pub use mock::{Mock, MockError};
pub use object_model::{JsValue, NativeFunction, ObjectError, ObjectHandle, ObjectHeap, PropertyKey};
pub use options::{MockOptions, MockOptionsInput, OptionsError, concat_options};
pub use proxy::{Middleware, ProxyHandler};
