//! Entry point: bind a default option layer once, then wrap targets with
//! per-call overrides stacked on top.

use tracing::debug;

use crate::mock::{MOCK_COMPONENT, Mock, MockError};
use crate::object_model::{JsValue, NativeFunction, ObjectError, ObjectHeap};
use crate::options::{MockOptions, MockOptionsInput, concat_options};

/// Name of the no-op callable wrapped when no target is given.
const EMPTY_TARGET_NAME: &str = "empty";

/// A factory bound to a default option layer.
#[derive(Debug, Clone, Default)]
pub struct Moxy {
    defaults: MockOptionsInput,
}

/// Bind `defaults` for every wrapper the returned factory creates.
pub fn factory(defaults: MockOptionsInput) -> Moxy {
    Moxy { defaults }
}

impl Moxy {
    pub fn defaults(&self) -> &MockOptionsInput {
        &self.defaults
    }

    /// Wrap `target` (or a fresh zero-arity no-op callable when `None`) in a
    /// new engine configured by the defaults merged with `overrides`.
    pub fn moxy(
        &self,
        heap: &mut ObjectHeap,
        target: Option<&JsValue>,
        overrides: MockOptionsInput,
    ) -> Result<JsValue, MockError> {
        let options = MockOptions::from(concat_options(self.defaults.clone(), overrides));
        let mock = Mock::with_options(options);
        let target = match target {
            Some(target) => target.clone(),
            None => {
                debug!(
                    component = MOCK_COMPONENT,
                    event = "moxy",
                    "no target given, wrapping an empty callable"
                );
                JsValue::Object(heap.alloc_function(
                    EMPTY_TARGET_NAME,
                    0,
                    NativeFunction::returning(JsValue::Undefined),
                ))
            }
        };
        mock.proxify(heap, &target)
    }

    /// The engine behind `wrapped`, whatever access key it was created with.
    /// Nothing is read through the wrapper, so no getter record is left.
    pub fn mock_of(&self, heap: &ObjectHeap, wrapped: &JsValue) -> Result<Option<Mock>, ObjectError> {
        Mock::of_wrapper(heap, wrapped)
    }
}
