//! Mock configuration: resolved options, partial option layers, and the
//! merger that stacks a per-call layer over a default layer.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::object_model::PropertyKey;
use crate::proxy::Middleware;

pub const DEFAULT_ACCESS_KEY: &str = "mock";

const ERROR_INVALID_OPTIONS: &str = "FE-MOXY-1101";

/// Fully resolved mock configuration.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MockOptions {
    /// Property reserved for retrieving the engine from its wrapper.
    pub access_key: PropertyKey,
    /// Trap-set transformers, applied left-to-right.
    #[serde(skip)]
    pub middlewares: Vec<Middleware>,
    pub proxify_return_value: bool,
    pub proxify_new_instance: bool,
    pub proxify_properties: bool,
    /// When present, only these keys have their values wrapped.
    pub include_properties: Option<Vec<PropertyKey>>,
    /// Keys whose values are never wrapped. Checked before the include list.
    pub exclude_properties: Option<Vec<PropertyKey>>,
}

impl Default for MockOptions {
    fn default() -> Self {
        Self {
            access_key: DEFAULT_ACCESS_KEY.into(),
            middlewares: Vec::new(),
            proxify_return_value: true,
            proxify_new_instance: true,
            proxify_properties: true,
            include_properties: None,
            exclude_properties: None,
        }
    }
}

impl MockOptions {
    /// Is the value read from `key` eligible for recursive wrapping?
    pub fn should_proxify_property(&self, key: &PropertyKey) -> bool {
        if !self.proxify_properties {
            return false;
        }
        if self
            .exclude_properties
            .as_ref()
            .is_some_and(|excluded| excluded.contains(key))
        {
            return false;
        }
        self.include_properties
            .as_ref()
            .is_none_or(|included| included.contains(key))
    }
}

impl From<MockOptionsInput> for MockOptions {
    fn from(input: MockOptionsInput) -> Self {
        let defaults = Self::default();
        Self {
            access_key: input.access_key.unwrap_or(defaults.access_key),
            middlewares: input.middlewares.unwrap_or_default(),
            proxify_return_value: input
                .proxify_return_value
                .unwrap_or(defaults.proxify_return_value),
            proxify_new_instance: input
                .proxify_new_instance
                .unwrap_or(defaults.proxify_new_instance),
            proxify_properties: input
                .proxify_properties
                .unwrap_or(defaults.proxify_properties),
            include_properties: input.include_properties,
            exclude_properties: input.exclude_properties,
        }
    }
}

// ---------------------------------------------------------------------------
// MockOptionsInput — one configuration layer
// ---------------------------------------------------------------------------

/// A partial configuration layer. Absent fields defer to the layer below.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MockOptionsInput {
    pub access_key: Option<PropertyKey>,
    /// Middlewares are code and never come from a config file.
    #[serde(skip)]
    pub middlewares: Option<Vec<Middleware>>,
    pub proxify_return_value: Option<bool>,
    pub proxify_new_instance: Option<bool>,
    pub proxify_properties: Option<bool>,
    pub include_properties: Option<Vec<PropertyKey>>,
    pub exclude_properties: Option<Vec<PropertyKey>>,
}

impl MockOptionsInput {
    /// Parse a layer from JSON, e.g. `{"access_key": "spy", "exclude_properties": ["raw"]}`.
    pub fn from_json_str(json: &str) -> Result<Self, OptionsError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn with_access_key(mut self, key: impl Into<PropertyKey>) -> Self {
        self.access_key = Some(key.into());
        self
    }

    pub fn with_middleware(mut self, middleware: Middleware) -> Self {
        self.middlewares.get_or_insert_with(Vec::new).push(middleware);
        self
    }

    pub fn with_proxify_return_value(mut self, enabled: bool) -> Self {
        self.proxify_return_value = Some(enabled);
        self
    }

    pub fn with_proxify_new_instance(mut self, enabled: bool) -> Self {
        self.proxify_new_instance = Some(enabled);
        self
    }

    pub fn with_proxify_properties(mut self, enabled: bool) -> Self {
        self.proxify_properties = Some(enabled);
        self
    }

    pub fn include<K: Into<PropertyKey>>(mut self, keys: impl IntoIterator<Item = K>) -> Self {
        self.include_properties
            .get_or_insert_with(Vec::new)
            .extend(keys.into_iter().map(Into::into));
        self
    }

    pub fn exclude<K: Into<PropertyKey>>(mut self, keys: impl IntoIterator<Item = K>) -> Self {
        self.exclude_properties
            .get_or_insert_with(Vec::new)
            .extend(keys.into_iter().map(Into::into));
        self
    }
}

impl From<MockOptions> for MockOptionsInput {
    fn from(options: MockOptions) -> Self {
        Self {
            access_key: Some(options.access_key),
            middlewares: (!options.middlewares.is_empty()).then_some(options.middlewares),
            proxify_return_value: Some(options.proxify_return_value),
            proxify_new_instance: Some(options.proxify_new_instance),
            proxify_properties: Some(options.proxify_properties),
            include_properties: options.include_properties,
            exclude_properties: options.exclude_properties,
        }
    }
}

/// Stack `overrides` on top of `base`: scalars are replaced only when the
/// override sets them; list options concatenate (`base` first).
pub fn concat_options(base: MockOptionsInput, overrides: MockOptionsInput) -> MockOptionsInput {
    MockOptionsInput {
        access_key: overrides.access_key.or(base.access_key),
        middlewares: concat_lists(base.middlewares, overrides.middlewares),
        proxify_return_value: overrides.proxify_return_value.or(base.proxify_return_value),
        proxify_new_instance: overrides.proxify_new_instance.or(base.proxify_new_instance),
        proxify_properties: overrides.proxify_properties.or(base.proxify_properties),
        include_properties: concat_lists(base.include_properties, overrides.include_properties),
        exclude_properties: concat_lists(base.exclude_properties, overrides.exclude_properties),
    }
}

fn concat_lists<T>(base: Option<Vec<T>>, overrides: Option<Vec<T>>) -> Option<Vec<T>> {
    match (base, overrides) {
        (Some(mut base), Some(overrides)) => {
            base.extend(overrides);
            Some(base)
        }
        (base, None) => base,
        (None, overrides) => overrides,
    }
}

// ---------------------------------------------------------------------------
// OptionsError
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum OptionsError {
    #[error("invalid mock options: {0}")]
    Parse(#[from] serde_json::Error),
}

impl OptionsError {
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Parse(_) => ERROR_INVALID_OPTIONS,
        }
    }
}
