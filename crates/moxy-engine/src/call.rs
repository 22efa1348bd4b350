//! One recorded interaction with a mocked value.

use serde::{Deserialize, Serialize};

use crate::object_model::{JsValue, ObjectError};

/// A trapped get, set, call or construction.
///
/// `result` holds the returned value, `instance` the receiver (or the
/// constructed instance for constructions). When the operation threw,
/// `error` carries the error and `result` stays `Undefined`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Call {
    pub args: Vec<JsValue>,
    pub result: JsValue,
    pub instance: JsValue,
    pub is_constructor: bool,
    pub error: Option<ObjectError>,
}

impl Default for Call {
    fn default() -> Self {
        Self {
            args: Vec::new(),
            result: JsValue::Undefined,
            instance: JsValue::Undefined,
            is_constructor: false,
            error: None,
        }
    }
}

impl Call {
    pub fn new(args: Vec<JsValue>, instance: JsValue) -> Self {
        Self {
            args,
            instance,
            ..Self::default()
        }
    }

    /// A construction record; `instance` is filled in once constructed.
    pub fn construction(args: Vec<JsValue>) -> Self {
        Self {
            args,
            is_constructor: true,
            ..Self::default()
        }
    }

    pub fn is_throw(&self) -> bool {
        self.error.is_some()
    }

    /// Record the outcome of `outcome` and hand it back unchanged.
    pub(crate) fn settle<T: Clone>(
        &mut self,
        outcome: Result<T, ObjectError>,
        store: impl FnOnce(&mut Self, T),
    ) -> Result<T, ObjectError> {
        match &outcome {
            Ok(value) => store(self, value.clone()),
            Err(err) => self.error = Some(err.clone()),
        }
        outcome
    }
}
