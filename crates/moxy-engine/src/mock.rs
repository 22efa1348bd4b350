//! The interception engine.
//!
//! A [`Mock`] owns the configuration, interaction history, per-property
//! getter/setter engines and the stub queue for one wrapped value. Its trap
//! set (see [`Mock::handle`]) is installed on a proxy whose target is an
//! empty stand-in; every trap maps the stand-in back to the real source, so
//! the engine decides per operation whether to delegate, override or wrap.
//!
//! Nested objects returned across the boundary are wrapped by child engines
//! that inherit the resolved options. The wrapper for a given nested value is
//! cached until the next `clear`/`reset`, which keeps repeated reads
//! reference-equal and stops cyclic structures from growing proxy chains.

use std::any::Any;
use std::cell::RefCell;
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::rc::Rc;

use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::call::Call;
use crate::object_model::{
    HostHandle, JsValue, ManagedObject, NativeFunction, ObjectError, ObjectHandle, ObjectHeap,
    PropertyDescriptor, PropertyKey,
};
use crate::options::{MockOptions, MockOptionsInput};
use crate::proxy::{
    ApplyTrap, ConstructTrap, DescriptorTrap, GetTrap, KeyTrap, OwnKeysTrap, PrototypeTrap,
    ProxyHandler, SetTrap, apply_middlewares,
};

pub const MOCK_COMPONENT: &str = "moxy_mock";

const ERROR_INVALID_TARGET: &str = "FE-MOXY-1001";
const ERROR_OBJECT_MODEL: &str = "FE-MOXY-1002";

/// Name of the no-op callable standing in for callable sources.
const STAND_IN_NAME: &str = "double";

/// Errors surfaced by the engine itself. Errors raised by sources and stubs
/// pass through as [`ObjectError`] unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MockError {
    #[error("cannot create proxy with a non-object as target (got {type_name})")]
    InvalidTarget { type_name: &'static str },
    #[error(transparent)]
    Object(#[from] ObjectError),
}

impl MockError {
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidTarget { .. } => ERROR_INVALID_TARGET,
            Self::Object(_) => ERROR_OBJECT_MODEL,
        }
    }
}

/// `prototype`, `name` and `length` of a callable always come from the
/// source: never stubbed, never wrapped.
fn is_function_intrinsic(key: &PropertyKey) -> bool {
    matches!(key, PropertyKey::String(s) if s == "prototype" || s == "name" || s == "length")
}

fn outcome_label<T>(outcome: &Result<T, ObjectError>) -> &'static str {
    if outcome.is_ok() { "returned" } else { "threw" }
}

// ---------------------------------------------------------------------------
// Engine state
// ---------------------------------------------------------------------------

#[derive(Default)]
struct MockState {
    calls: Vec<Call>,
    /// Nested value → the wrapper already created for it.
    proxified_cache: BTreeMap<ObjectHandle, JsValue>,
    getter_mocks: BTreeMap<PropertyKey, Mock>,
    setter_mocks: BTreeMap<PropertyKey, Mock>,
    implementation_queue: VecDeque<NativeFunction>,
    default_implementation: Option<NativeFunction>,
}

struct MockInner {
    options: MockOptions,
    state: RefCell<MockState>,
    /// Stand-in → source. Written once per `proxify`, never updated.
    target_source: RefCell<BTreeMap<ObjectHandle, ObjectHandle>>,
    /// Heap slot holding this engine, allocated on first `handle`.
    host: RefCell<Option<HostHandle>>,
}

/// Handle to a mock engine. Clones share the same engine; equality is
/// identity.
#[derive(Clone)]
pub struct Mock {
    inner: Rc<MockInner>,
}

impl Default for Mock {
    fn default() -> Self {
        Self::new(MockOptionsInput::default())
    }
}

impl PartialEq for Mock {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Mock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.borrow();
        f.debug_struct("Mock")
            .field("options", &self.inner.options)
            .field("calls", &state.calls.len())
            .field("queued_implementations", &state.implementation_queue.len())
            .field("has_default_implementation", &state.default_implementation.is_some())
            .finish()
    }
}

impl Mock {
    /// Create an engine with the built-in defaults under `input`.
    pub fn new(input: MockOptionsInput) -> Self {
        Self::with_options(MockOptions::from(input))
    }

    /// Create an engine from already resolved options.
    pub fn with_options(options: MockOptions) -> Self {
        Self {
            inner: Rc::new(MockInner {
                options,
                state: RefCell::new(MockState::default()),
                target_source: RefCell::new(BTreeMap::new()),
                host: RefCell::new(None),
            }),
        }
    }

    /// Recover the engine from the value read through its access key.
    pub fn from_value(heap: &ObjectHeap, value: &JsValue) -> Option<Self> {
        let JsValue::Host(handle) = value else {
            return None;
        };
        let inner = heap.host(*handle)?.downcast::<MockInner>().ok()?;
        Some(Self { inner })
    }

    /// The engine that owns the proxy `wrapped`, read from the heap without
    /// running any trap. `None` for values that are not engine wrappers.
    pub fn of_wrapper(heap: &ObjectHeap, wrapped: &JsValue) -> Result<Option<Self>, ObjectError> {
        let Some(handle) = wrapped.as_object() else {
            return Ok(None);
        };
        let owner = match heap.get(handle)? {
            ManagedObject::Proxy(proxy) => proxy.handler.owner,
            ManagedObject::Ordinary(_) => None,
        };
        Ok(owner.and_then(|host| Self::from_value(heap, &JsValue::Host(host))))
    }

    /// Read `access_key` from `wrapped` and recover the engine behind it.
    pub fn lookup(
        heap: &mut ObjectHeap,
        wrapped: &JsValue,
        access_key: &PropertyKey,
    ) -> Result<Option<Self>, ObjectError> {
        let Some(handle) = wrapped.as_object() else {
            return Ok(None);
        };
        let value = heap.get_property(handle, access_key)?;
        Ok(Self::from_value(heap, &value))
    }

    pub fn options(&self) -> &MockOptions {
        &self.inner.options
    }

    /// Snapshot of this engine's own call/construct records.
    pub fn calls(&self) -> Vec<Call> {
        self.inner.state.borrow().calls.clone()
    }

    /// The engine tracking reads of `key`, created on first access.
    pub fn getter(&self, key: impl Into<PropertyKey>) -> Mock {
        self.inner
            .state
            .borrow_mut()
            .getter_mocks
            .entry(key.into())
            .or_default()
            .clone()
    }

    /// The engine tracking writes of `key`, created on first access.
    pub fn setter(&self, key: impl Into<PropertyKey>) -> Mock {
        self.inner
            .state
            .borrow_mut()
            .setter_mocks
            .entry(key.into())
            .or_default()
            .clone()
    }

    /// Forget recorded calls and nested wrappers, recursively clearing the
    /// existing getter/setter engines. Stubs and registries are kept.
    pub fn clear(&self) {
        let children: Vec<Mock> = {
            let mut state = self.inner.state.borrow_mut();
            state.calls = Vec::new();
            state.proxified_cache = BTreeMap::new();
            let children = state
                .getter_mocks
                .values()
                .chain(state.setter_mocks.values())
                .cloned()
                .collect();
            children
        };
        for child in &children {
            child.clear();
        }
        debug!(
            component = MOCK_COMPONENT,
            event = "clear",
            children = children.len(),
            "cleared recorded calls"
        );
    }

    /// Rewind to a freshly constructed engine: calls, nested wrappers,
    /// getter/setter engines and stubs are all dropped.
    pub fn reset(&self) {
        *self.inner.state.borrow_mut() = MockState::default();
        debug!(component = MOCK_COMPONENT, event = "reset", "reset engine state");
    }

    /// Replace the real implementation until `reset`.
    pub fn fake<F>(&self, implementation: F)
    where
        F: Fn(&mut ObjectHeap, &JsValue, &[JsValue]) -> Result<JsValue, ObjectError> + 'static,
    {
        self.inner.state.borrow_mut().default_implementation =
            Some(NativeFunction::new(implementation));
        debug!(component = MOCK_COMPONENT, event = "fake", "installed default implementation");
    }

    /// Queue an implementation for the next call only.
    pub fn fake_once<F>(&self, implementation: F)
    where
        F: Fn(&mut ObjectHeap, &JsValue, &[JsValue]) -> Result<JsValue, ObjectError> + 'static,
    {
        let mut state = self.inner.state.borrow_mut();
        state
            .implementation_queue
            .push_back(NativeFunction::new(implementation));
        debug!(
            component = MOCK_COMPONENT,
            event = "fake_once",
            queued = state.implementation_queue.len(),
            "queued one-shot implementation"
        );
    }

    pub fn fake_return_value(&self, value: impl Into<JsValue>) {
        let value = value.into();
        self.fake(move |_, _, _| Ok(value.clone()));
    }

    pub fn fake_return_value_once(&self, value: impl Into<JsValue>) {
        let value = value.into();
        self.fake_once(move |_, _, _| Ok(value.clone()));
    }

    /// Wrap `source` so that every interaction goes through this engine.
    pub fn proxify(&self, heap: &mut ObjectHeap, source: &JsValue) -> Result<JsValue, MockError> {
        let Some(source) = source.as_object() else {
            let type_name = source.type_name();
            warn!(
                component = MOCK_COMPONENT,
                event = "proxify",
                outcome = "rejected",
                type_name,
                "source is neither an object nor a callable"
            );
            return Err(MockError::InvalidTarget { type_name });
        };
        Ok(self.proxify_object(heap, source)?)
    }

    fn proxify_object(
        &self,
        heap: &mut ObjectHeap,
        source: ObjectHandle,
    ) -> Result<JsValue, ObjectError> {
        let callable = heap.is_callable(source)?;
        let target = self.register_source(heap, source, callable);
        let handler = self.handle(heap);
        let proxy = heap.alloc_proxy(target, handler);
        debug!(
            component = MOCK_COMPONENT,
            event = "proxify",
            outcome = "wrapped",
            callable,
            source = source.0,
            proxy = proxy.0,
            "created wrapper"
        );
        Ok(JsValue::Object(proxy))
    }

    /// Allocate a stand-in of the same kind as `source` and remember which
    /// source it represents.
    fn register_source(
        &self,
        heap: &mut ObjectHeap,
        source: ObjectHandle,
        callable: bool,
    ) -> ObjectHandle {
        let target = if callable {
            heap.alloc_function(STAND_IN_NAME, 0, NativeFunction::returning(JsValue::Undefined))
        } else {
            heap.alloc_plain()
        };
        self.inner.target_source.borrow_mut().insert(target, source);
        target
    }

    fn source_of(&self, target: ObjectHandle) -> Result<ObjectHandle, ObjectError> {
        self.inner
            .target_source
            .borrow()
            .get(&target)
            .copied()
            .ok_or_else(|| {
                ObjectError::TypeError(format!(
                    "object#{} is not a stand-in registered with this mock",
                    target.0
                ))
            })
    }

    /// Oldest queued stub, else the default stub. `None` means "use the
    /// real implementation".
    fn take_implementation(&self) -> Option<NativeFunction> {
        let mut state = self.inner.state.borrow_mut();
        match state.implementation_queue.pop_front() {
            Some(implementation) => Some(implementation),
            None => state.default_implementation.clone(),
        }
    }

    fn record(&self, call: Call) {
        self.inner.state.borrow_mut().calls.push(call);
    }

    /// The wrapper for a nested value, created by a child engine on first
    /// sight and reused afterwards.
    fn get_proxified(&self, heap: &mut ObjectHeap, value: JsValue) -> Result<JsValue, ObjectError> {
        let Some(handle) = value.as_object() else {
            return Ok(value);
        };
        if let Some(wrapped) = self.inner.state.borrow().proxified_cache.get(&handle) {
            return Ok(wrapped.clone());
        }
        let child = Mock::with_options(self.inner.options.clone());
        let wrapped = child.proxify_object(heap, handle)?;
        self.inner
            .state
            .borrow_mut()
            .proxified_cache
            .insert(handle, wrapped.clone());
        Ok(wrapped)
    }

    // -----------------------------------------------------------------------
    // Trap set
    // -----------------------------------------------------------------------

    /// Heap slot holding this engine. Allocated once per heap; a cached slot
    /// from another heap is replaced.
    fn host_handle(&self, heap: &mut ObjectHeap) -> HostHandle {
        let cached = *self.inner.host.borrow();
        if let Some(host) = cached
            && heap
                .host(host)
                .and_then(|value| value.downcast::<MockInner>().ok())
                .is_some_and(|inner| Rc::ptr_eq(&inner, &self.inner))
        {
            return host;
        }
        let host = heap.alloc_host(Rc::clone(&self.inner) as Rc<dyn Any>);
        *self.inner.host.borrow_mut() = Some(host);
        host
    }

    /// Build the trap set for a proxy owned by this engine, decorated by the
    /// configured middlewares.
    pub fn handle(&self, heap: &mut ObjectHeap) -> ProxyHandler {
        let host = self.host_handle(heap);

        let get: GetTrap = {
            let mock = self.clone();
            Rc::new(
                move |heap: &mut ObjectHeap,
                      target: ObjectHandle,
                      key: &PropertyKey,
                      receiver: &JsValue|
                      -> Result<JsValue, ObjectError> {
                    if *key == mock.options().access_key {
                        return Ok(JsValue::Host(host));
                    }
                    mock.trap_get(heap, target, key, receiver)
                },
            )
        };

        let set: SetTrap = {
            let mock = self.clone();
            Rc::new(
                move |heap: &mut ObjectHeap,
                      target: ObjectHandle,
                      key: &PropertyKey,
                      value: JsValue,
                      receiver: &JsValue|
                      -> Result<bool, ObjectError> {
                    if *key == mock.options().access_key {
                        warn!(
                            component = MOCK_COMPONENT,
                            event = "set",
                            outcome = "rejected",
                            key = %key,
                            "access key is read-only"
                        );
                        return Ok(false);
                    }
                    mock.trap_set(heap, target, key, value, receiver)
                },
            )
        };

        let apply: ApplyTrap = {
            let mock = self.clone();
            Rc::new(
                move |heap: &mut ObjectHeap,
                      target: ObjectHandle,
                      this: &JsValue,
                      args: &[JsValue]|
                      -> Result<JsValue, ObjectError> {
                    mock.trap_apply(heap, target, this, args)
                },
            )
        };

        let construct: ConstructTrap = {
            let mock = self.clone();
            Rc::new(
                move |heap: &mut ObjectHeap,
                      target: ObjectHandle,
                      args: &[JsValue],
                      new_target: ObjectHandle|
                      -> Result<JsValue, ObjectError> {
                    mock.trap_construct(heap, target, args, new_target)
                },
            )
        };

        let has: KeyTrap = {
            let mock = self.clone();
            Rc::new(
                move |heap: &mut ObjectHeap,
                      target: ObjectHandle,
                      key: &PropertyKey|
                      -> Result<bool, ObjectError> {
                    let source = mock.source_of(target)?;
                    Ok(heap.has_property(target, key)? || heap.has_property(source, key)?)
                },
            )
        };

        let own_keys: OwnKeysTrap = {
            let mock = self.clone();
            Rc::new(
                move |heap: &mut ObjectHeap,
                      target: ObjectHandle|
                      -> Result<Vec<PropertyKey>, ObjectError> {
                    let source = mock.source_of(target)?;
                    let mut keys = heap.own_keys(target)?;
                    for key in heap.own_keys(source)? {
                        if !keys.contains(&key) {
                            keys.push(key);
                        }
                    }
                    Ok(keys)
                },
            )
        };

        let get_own_property_descriptor: DescriptorTrap = {
            let mock = self.clone();
            Rc::new(
                move |heap: &mut ObjectHeap,
                      target: ObjectHandle,
                      key: &PropertyKey|
                      -> Result<Option<PropertyDescriptor>, ObjectError> {
                    let source = mock.source_of(target)?;
                    match heap.get_own_property_descriptor(target, key)? {
                        Some(desc) => Ok(Some(desc)),
                        None => heap.get_own_property_descriptor(source, key),
                    }
                },
            )
        };

        let get_prototype_of: PrototypeTrap = {
            let mock = self.clone();
            Rc::new(
                move |heap: &mut ObjectHeap,
                      target: ObjectHandle|
                      -> Result<Option<ObjectHandle>, ObjectError> {
                    let source = mock.source_of(target)?;
                    if !heap.is_callable(source)?
                        && let Some(proto) = heap.get_prototype_of(target)?
                    {
                        return Ok(Some(proto));
                    }
                    heap.get_prototype_of(source)
                },
            )
        };

        let base = ProxyHandler {
            get: Some(get),
            set: Some(set),
            has: Some(has),
            own_keys: Some(own_keys),
            get_own_property_descriptor: Some(get_own_property_descriptor),
            get_prototype_of: Some(get_prototype_of),
            apply: Some(apply),
            construct: Some(construct),
            ..ProxyHandler::default()
        };
        ProxyHandler {
            owner: Some(host),
            ..apply_middlewares(base, &self.inner.options.middlewares, self)
        }
    }

    fn trap_get(
        &self,
        heap: &mut ObjectHeap,
        target: ObjectHandle,
        key: &PropertyKey,
        receiver: &JsValue,
    ) -> Result<JsValue, ObjectError> {
        let getter = self.getter(key.clone());
        let implementation = getter.take_implementation();
        let mut call = Call::new(Vec::new(), receiver.clone());
        let outcome = self.read_property(heap, target, key, receiver, implementation);
        let outcome = call.settle(outcome, |call, value| call.result = value);
        trace!(
            component = MOCK_COMPONENT,
            event = "get",
            key = %key,
            outcome = outcome_label(&outcome)
        );
        getter.record(call);
        outcome
    }

    fn read_property(
        &self,
        heap: &mut ObjectHeap,
        target: ObjectHandle,
        key: &PropertyKey,
        receiver: &JsValue,
        implementation: Option<NativeFunction>,
    ) -> Result<JsValue, ObjectError> {
        let source = self.source_of(target)?;
        let intrinsic = heap.is_callable(source)? && is_function_intrinsic(key);
        let property = match implementation {
            Some(stub) => stub.invoke(heap, receiver, &[])?,
            None => {
                let holder = if !intrinsic && heap.has_property(target, key)? {
                    target
                } else {
                    source
                };
                heap.get_property(holder, key)?
            }
        };
        if !intrinsic && property.is_object() && self.inner.options.should_proxify_property(key) {
            return self.get_proxified(heap, property);
        }
        Ok(property)
    }

    fn trap_set(
        &self,
        heap: &mut ObjectHeap,
        target: ObjectHandle,
        key: &PropertyKey,
        value: JsValue,
        receiver: &JsValue,
    ) -> Result<bool, ObjectError> {
        let setter = self.setter(key.clone());
        let implementation = setter.take_implementation();
        let mut call = Call::new(vec![value.clone()], receiver.clone());
        let outcome = match implementation {
            Some(stub) => stub
                .invoke(heap, receiver, &[value])
                .map(|result| (true, result)),
            None => heap
                .set_property(target, key.clone(), value)
                .map(|written| (written, JsValue::Undefined)),
        };
        let outcome = call.settle(outcome, |call, (_, result)| call.result = result);
        trace!(
            component = MOCK_COMPONENT,
            event = "set",
            key = %key,
            outcome = outcome_label(&outcome)
        );
        setter.record(call);
        outcome.map(|(written, _)| written)
    }

    fn trap_apply(
        &self,
        heap: &mut ObjectHeap,
        target: ObjectHandle,
        this: &JsValue,
        args: &[JsValue],
    ) -> Result<JsValue, ObjectError> {
        let source = self.source_of(target)?;
        let implementation = self.take_implementation();
        let mut call = Call::new(args.to_vec(), this.clone());
        let outcome = match implementation {
            Some(stub) => stub.invoke(heap, this, args),
            None => heap.call(source, this.clone(), args),
        }
        .and_then(|result| {
            if self.inner.options.proxify_return_value {
                self.get_proxified(heap, result)
            } else {
                Ok(result)
            }
        });
        let outcome = call.settle(outcome, |call, result| call.result = result);
        trace!(
            component = MOCK_COMPONENT,
            event = "apply",
            args = args.len(),
            outcome = outcome_label(&outcome)
        );
        self.record(call);
        outcome
    }

    fn trap_construct(
        &self,
        heap: &mut ObjectHeap,
        target: ObjectHandle,
        args: &[JsValue],
        new_target: ObjectHandle,
    ) -> Result<JsValue, ObjectError> {
        let source = self.source_of(target)?;
        let implementation = self.take_implementation();
        let mut call = Call::construction(args.to_vec());
        let outcome = match implementation {
            Some(stub) => heap.construct_native(&stub, args, new_target),
            None => heap.construct_with_new_target(source, args, new_target),
        }
        .and_then(|instance| {
            if self.inner.options.proxify_new_instance {
                self.get_proxified(heap, instance)
            } else {
                Ok(instance)
            }
        });
        let outcome = call.settle(outcome, |call, instance| call.instance = instance);
        trace!(
            component = MOCK_COMPONENT,
            event = "construct",
            args = args.len(),
            outcome = outcome_label(&outcome)
        );
        self.record(call);
        outcome
    }
}
