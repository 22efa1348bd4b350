//! Host object model the mock engine intercepts.
//!
//! An arena of managed objects addressed by [`ObjectHandle`]. Handles are
//! the identity of an object: two values are "the same object" iff they
//! carry the same handle. Key features:
//!
//! - **Property descriptors**: data vs accessor, configurable/enumerable/writable
//! - **Prototype chains**: `[[Prototype]]` slot with cycle- and depth-guarded walks
//! - **Callables**: native closures stored in an object's call slot, with
//!   ordinary `[[Construct]]` semantics for constructable functions
//! - **Proxy**: every heap operation on a proxy dispatches to the matching
//!   trap of its [`ProxyHandler`], or forwards to the proxy target when the
//!   trap is absent
//! - **Host slots**: opaque Rust values that can travel through a property
//!   read as [`JsValue::Host`]
//!
//! `BTreeMap`/`BTreeSet` for deterministic ordering.

use std::any::Any;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::proxy::ProxyHandler;

// ---------------------------------------------------------------------------
// PropertyKey — string or symbol
// ---------------------------------------------------------------------------

/// Unique symbol identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SymbolId(pub u32);

/// A property key: either a string or a symbol.
///
/// Serialized untagged, so configuration files can list keys as plain
/// strings.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyKey {
    /// String key.
    String(String),
    /// Symbol key.
    Symbol(SymbolId),
}

impl fmt::Display for PropertyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(s) => write!(f, "{s}"),
            Self::Symbol(id) => write!(f, "Symbol({})", id.0),
        }
    }
}

impl From<&str> for PropertyKey {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for PropertyKey {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<SymbolId> for PropertyKey {
    fn from(id: SymbolId) -> Self {
        Self::Symbol(id)
    }
}

// ---------------------------------------------------------------------------
// Handles
// ---------------------------------------------------------------------------

/// Opaque handle referencing an object on the managed heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectHandle(pub u32);

/// Opaque handle referencing a host value slot on the managed heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct HostHandle(pub u32);

// ---------------------------------------------------------------------------
// JsValue — runtime value
// ---------------------------------------------------------------------------

/// Runtime value flowing through the object model.
///
/// Functions are objects whose call slot is populated, so both plain
/// objects and callables travel as [`JsValue::Object`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum JsValue {
    Undefined,
    Null,
    Bool(bool),
    Int(i64),
    Str(String),
    Symbol(SymbolId),
    Object(ObjectHandle),
    Host(HostHandle),
}

impl JsValue {
    /// Is this an object or callable (i.e. something a proxy can wrap)?
    pub fn is_object(&self) -> bool {
        matches!(self, Self::Object(_))
    }

    /// The object handle, if this is an object.
    pub fn as_object(&self) -> Option<ObjectHandle> {
        match self {
            Self::Object(h) => Some(*h),
            _ => None,
        }
    }

    /// `typeof` without heap access; callables report `"object"` here,
    /// use [`ObjectHeap::type_of`] to tell them apart.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Undefined => "undefined",
            Self::Null => "null",
            Self::Bool(_) => "boolean",
            Self::Int(_) => "number",
            Self::Str(_) => "string",
            Self::Symbol(_) => "symbol",
            Self::Object(_) => "object",
            Self::Host(_) => "host",
        }
    }

    /// SameValue comparison. Objects compare by handle.
    pub fn same_value(&self, other: &Self) -> bool {
        self == other
    }
}

impl From<i64> for JsValue {
    fn from(n: i64) -> Self {
        Self::Int(n)
    }
}

impl From<bool> for JsValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<&str> for JsValue {
    fn from(s: &str) -> Self {
        Self::Str(s.to_string())
    }
}

impl From<ObjectHandle> for JsValue {
    fn from(h: ObjectHandle) -> Self {
        Self::Object(h)
    }
}

impl fmt::Display for JsValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Undefined => write!(f, "undefined"),
            Self::Null => write!(f, "null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(n) => write!(f, "{n}"),
            Self::Str(s) => write!(f, "{s}"),
            Self::Symbol(id) => write!(f, "Symbol({})", id.0),
            Self::Object(h) => write!(f, "[object#{}]", h.0),
            Self::Host(h) => write!(f, "[host#{}]", h.0),
        }
    }
}

// ---------------------------------------------------------------------------
// PropertyDescriptor
// ---------------------------------------------------------------------------

/// Property descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PropertyDescriptor {
    /// Data descriptor: has `value` and `writable`.
    Data {
        value: JsValue,
        writable: bool,
        enumerable: bool,
        configurable: bool,
    },
    /// Accessor descriptor: getter/setter are callable objects.
    Accessor {
        get: Option<ObjectHandle>,
        set: Option<ObjectHandle>,
        enumerable: bool,
        configurable: bool,
    },
}

impl PropertyDescriptor {
    /// Create a default data descriptor (writable, enumerable, configurable).
    pub fn data(value: JsValue) -> Self {
        Self::Data {
            value,
            writable: true,
            enumerable: true,
            configurable: true,
        }
    }

    /// Data descriptor shaped like a function's `name`/`length`:
    /// non-writable, non-enumerable, configurable.
    pub fn data_intrinsic(value: JsValue) -> Self {
        Self::Data {
            value,
            writable: false,
            enumerable: false,
            configurable: true,
        }
    }

    /// Is this descriptor configurable?
    pub fn is_configurable(&self) -> bool {
        match self {
            Self::Data { configurable, .. } | Self::Accessor { configurable, .. } => *configurable,
        }
    }

    /// Is this descriptor enumerable?
    pub fn is_enumerable(&self) -> bool {
        match self {
            Self::Data { enumerable, .. } | Self::Accessor { enumerable, .. } => *enumerable,
        }
    }

    /// Is this a data descriptor?
    pub fn is_data(&self) -> bool {
        matches!(self, Self::Data { .. })
    }

    /// Is this an accessor descriptor?
    pub fn is_accessor(&self) -> bool {
        matches!(self, Self::Accessor { .. })
    }

    /// Get the value if this is a data descriptor.
    pub fn value(&self) -> Option<&JsValue> {
        match self {
            Self::Data { value, .. } => Some(value),
            Self::Accessor { .. } => None,
        }
    }

    /// Is this a data descriptor with writable=true?
    pub fn is_writable(&self) -> bool {
        match self {
            Self::Data { writable, .. } => *writable,
            Self::Accessor { .. } => false,
        }
    }
}

// ---------------------------------------------------------------------------
// ObjectError
// ---------------------------------------------------------------------------

/// Errors from object model operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObjectError {
    /// TypeError raised by the object model itself.
    TypeError(String),
    /// A value thrown by user code (a native function, getter or stub).
    Thrown(JsValue),
    /// Object not found in the heap.
    ObjectNotFound(ObjectHandle),
    /// Call on a value without a call slot.
    NotCallable(JsValue),
    /// Construct on a value that is not a constructor.
    NotConstructor(JsValue),
    /// Prototype chain cycle detected.
    PrototypeCycleDetected,
    /// Maximum prototype chain depth exceeded.
    PrototypeChainTooDeep { depth: u32, max: u32 },
}

impl ObjectError {
    /// Shorthand for throwing a plain value from a native function.
    pub fn thrown(value: impl Into<JsValue>) -> Self {
        Self::Thrown(value.into())
    }
}

impl fmt::Display for ObjectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TypeError(msg) => write!(f, "TypeError: {msg}"),
            Self::Thrown(value) => write!(f, "uncaught {value}"),
            Self::ObjectNotFound(h) => write!(f, "object#{} not found", h.0),
            Self::NotCallable(value) => write!(f, "TypeError: {value} is not a function"),
            Self::NotConstructor(value) => write!(f, "TypeError: {value} is not a constructor"),
            Self::PrototypeCycleDetected => write!(f, "TypeError: prototype chain cycle detected"),
            Self::PrototypeChainTooDeep { depth, max } => {
                write!(
                    f,
                    "TypeError: prototype chain depth {depth} exceeds max {max}"
                )
            }
        }
    }
}

impl std::error::Error for ObjectError {}

// ---------------------------------------------------------------------------
// NativeFunction — the body of a callable
// ---------------------------------------------------------------------------

type NativeFn = dyn Fn(&mut ObjectHeap, &JsValue, &[JsValue]) -> Result<JsValue, ObjectError>;

/// A native closure invoked as `(heap, this, args)`.
#[derive(Clone)]
pub struct NativeFunction(Rc<NativeFn>);

impl NativeFunction {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&mut ObjectHeap, &JsValue, &[JsValue]) -> Result<JsValue, ObjectError> + 'static,
    {
        Self(Rc::new(f))
    }

    /// A body that ignores its inputs and returns a clone of `value`.
    pub fn returning(value: JsValue) -> Self {
        Self::new(move |_, _, _| Ok(value.clone()))
    }

    pub fn invoke(
        &self,
        heap: &mut ObjectHeap,
        this: &JsValue,
        args: &[JsValue],
    ) -> Result<JsValue, ObjectError> {
        (self.0)(heap, this, args)
    }

    /// Identity comparison.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for NativeFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("NativeFunction")
    }
}

// ---------------------------------------------------------------------------
// OrdinaryObject
// ---------------------------------------------------------------------------

/// Maximum prototype chain depth to prevent infinite loops.
const MAX_PROTOTYPE_CHAIN_DEPTH: u32 = 1024;

/// An ordinary object with internal slots.
#[derive(Debug, Clone)]
pub struct OrdinaryObject {
    /// `[[Prototype]]` internal slot (None means end of chain).
    pub prototype: Option<ObjectHandle>,
    /// `[[Extensible]]` internal slot.
    pub extensible: bool,
    /// Own properties with descriptors.
    pub properties: BTreeMap<PropertyKey, PropertyDescriptor>,
    /// `[[Call]]` body; `Some` makes the object callable.
    pub call: Option<NativeFunction>,
    /// Does this object support `[[Construct]]`?
    pub constructable: bool,
}

impl Default for OrdinaryObject {
    fn default() -> Self {
        Self {
            prototype: None,
            extensible: true,
            properties: BTreeMap::new(),
            call: None,
            constructable: false,
        }
    }
}

impl OrdinaryObject {
    /// Create a new ordinary object with the given prototype.
    pub fn with_prototype(proto: Option<ObjectHandle>) -> Self {
        Self {
            prototype: proto,
            ..Self::default()
        }
    }

    /// `[[GetOwnProperty]](P)`.
    pub fn get_own_property(&self, key: &PropertyKey) -> Option<&PropertyDescriptor> {
        self.properties.get(key)
    }

    /// Does this object have an own property `key`?
    pub fn has_own_property(&self, key: &PropertyKey) -> bool {
        self.properties.contains_key(key)
    }

    /// `[[DefineOwnProperty]](P, Desc)`.
    ///
    /// Returns `false` if the object is non-extensible and `key` is new, or if
    /// the existing property is non-configurable and the update would change
    /// its shape.
    pub fn define_own_property(&mut self, key: PropertyKey, desc: PropertyDescriptor) -> bool {
        let allowed = match self.properties.get(&key) {
            None => self.extensible,
            Some(current) if current.is_configurable() => true,
            Some(current) => {
                !desc.is_configurable()
                    && desc.is_enumerable() == current.is_enumerable()
                    && desc.is_data() == current.is_data()
                    && !alters_locked_value(current, &desc)
            }
        };
        if allowed {
            self.properties.insert(key, desc);
        }
        allowed
    }

    /// `[[Delete]](P)` — returns `false` if non-configurable.
    pub fn delete(&mut self, key: &PropertyKey) -> bool {
        match self.properties.get(key) {
            Some(desc) if !desc.is_configurable() => false,
            Some(_) => {
                self.properties.remove(key);
                true
            }
            None => true,
        }
    }

    /// `[[OwnPropertyKeys]]()` — integer indices (sorted numerically), then
    /// string keys, then symbol keys.
    pub fn own_property_keys(&self) -> Vec<PropertyKey> {
        let mut int_keys: Vec<(u64, PropertyKey)> = Vec::new();
        let mut str_keys: Vec<PropertyKey> = Vec::new();
        let mut sym_keys: Vec<PropertyKey> = Vec::new();

        for key in self.properties.keys() {
            match key {
                PropertyKey::String(s) => {
                    if let Ok(n) = s.parse::<u64>() {
                        int_keys.push((n, key.clone()));
                    } else {
                        str_keys.push(key.clone());
                    }
                }
                PropertyKey::Symbol(_) => sym_keys.push(key.clone()),
            }
        }

        int_keys.sort_by_key(|(n, _)| *n);
        let mut result: Vec<PropertyKey> = int_keys.into_iter().map(|(_, k)| k).collect();
        result.extend(str_keys);
        result.extend(sym_keys);
        result
    }
}

/// Would `desc` make a non-writable, non-configurable data property writable
/// or change its value?
fn alters_locked_value(current: &PropertyDescriptor, desc: &PropertyDescriptor) -> bool {
    match (current, desc) {
        (
            PropertyDescriptor::Data {
                writable: false,
                value: current_v,
                ..
            },
            PropertyDescriptor::Data {
                writable: new_w,
                value: new_v,
                ..
            },
        ) => *new_w || !current_v.same_value(new_v),
        _ => false,
    }
}

// ---------------------------------------------------------------------------
// ProxyObject / ManagedObject
// ---------------------------------------------------------------------------

/// Proxy internal state.
#[derive(Debug, Clone)]
pub struct ProxyObject {
    /// `[[ProxyTarget]]`.
    pub target: ObjectHandle,
    /// `[[ProxyHandler]]`.
    pub handler: ProxyHandler,
}

/// A managed object: either ordinary or a Proxy.
#[derive(Debug, Clone)]
pub enum ManagedObject {
    Ordinary(OrdinaryObject),
    Proxy(ProxyObject),
}

impl ManagedObject {
    pub fn as_ordinary(&self) -> Option<&OrdinaryObject> {
        match self {
            Self::Ordinary(o) => Some(o),
            Self::Proxy(_) => None,
        }
    }

    pub fn as_proxy(&self) -> Option<&ProxyObject> {
        match self {
            Self::Proxy(p) => Some(p),
            Self::Ordinary(_) => None,
        }
    }
}

/// Opaque Rust value parked on the heap.
#[derive(Clone)]
struct HostSlot(Rc<dyn Any>);

impl fmt::Debug for HostSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("HostSlot")
    }
}

/// What a single step of a prototype walk found.
enum Lookup<T> {
    Found(T),
    Proxy(ObjectHandle, ProxyHandler),
    Missing,
}

// ---------------------------------------------------------------------------
// ObjectHeap — the managed object store
// ---------------------------------------------------------------------------

/// The object heap: arena of managed objects.
///
/// Objects are never freed individually; the heap is dropped as a whole.
#[derive(Debug, Default)]
pub struct ObjectHeap {
    objects: Vec<ManagedObject>,
    hosts: Vec<HostSlot>,
    next_symbol: u32,
}

impl ObjectHeap {
    /// Create a new empty heap.
    pub fn new() -> Self {
        Self::default()
    }

    // -- Allocation ----------------------------------------------------------

    fn push(&mut self, object: ManagedObject) -> ObjectHandle {
        let handle = ObjectHandle(self.objects.len() as u32);
        self.objects.push(object);
        handle
    }

    /// Allocate a new ordinary object with the given prototype.
    pub fn alloc(&mut self, proto: Option<ObjectHandle>) -> ObjectHandle {
        self.push(ManagedObject::Ordinary(OrdinaryObject::with_prototype(
            proto,
        )))
    }

    /// Allocate a new ordinary object without a prototype.
    pub fn alloc_plain(&mut self) -> ObjectHandle {
        self.alloc(None)
    }

    /// Allocate a constructable function with own `name`, `length` and
    /// `prototype` properties.
    pub fn alloc_function(&mut self, name: &str, arity: i64, body: NativeFunction) -> ObjectHandle {
        let prototype = self.alloc_plain();
        let handle = self.alloc_callable(name, arity, body, true);
        if let Ok(ManagedObject::Ordinary(o)) = self.get_mut(handle) {
            o.properties.insert(
                "prototype".into(),
                PropertyDescriptor::Data {
                    value: JsValue::Object(prototype),
                    writable: true,
                    enumerable: false,
                    configurable: false,
                },
            );
        }
        handle
    }

    /// Allocate a callable that cannot be constructed (no `prototype`).
    pub fn alloc_non_constructor(
        &mut self,
        name: &str,
        arity: i64,
        body: NativeFunction,
    ) -> ObjectHandle {
        self.alloc_callable(name, arity, body, false)
    }

    fn alloc_callable(
        &mut self,
        name: &str,
        arity: i64,
        body: NativeFunction,
        constructable: bool,
    ) -> ObjectHandle {
        let mut object = OrdinaryObject {
            call: Some(body),
            constructable,
            ..OrdinaryObject::default()
        };
        object.properties.insert(
            "name".into(),
            PropertyDescriptor::data_intrinsic(JsValue::Str(name.to_string())),
        );
        object.properties.insert(
            "length".into(),
            PropertyDescriptor::data_intrinsic(JsValue::Int(arity)),
        );
        self.push(ManagedObject::Ordinary(object))
    }

    /// Allocate a Proxy object.
    pub fn alloc_proxy(&mut self, target: ObjectHandle, handler: ProxyHandler) -> ObjectHandle {
        self.push(ManagedObject::Proxy(ProxyObject { target, handler }))
    }

    /// Allocate a new unique symbol id.
    pub fn alloc_symbol(&mut self) -> SymbolId {
        let id = SymbolId(self.next_symbol);
        self.next_symbol += 1;
        id
    }

    /// Park a host value on the heap.
    pub fn alloc_host(&mut self, value: Rc<dyn Any>) -> HostHandle {
        let handle = HostHandle(self.hosts.len() as u32);
        self.hosts.push(HostSlot(value));
        handle
    }

    /// Look up a host value.
    pub fn host(&self, handle: HostHandle) -> Option<Rc<dyn Any>> {
        self.hosts.get(handle.0 as usize).map(|slot| Rc::clone(&slot.0))
    }

    /// Create a plain object from key-value pairs.
    pub fn from_entries<K: Into<PropertyKey>>(
        &mut self,
        entries: impl IntoIterator<Item = (K, JsValue)>,
    ) -> ObjectHandle {
        let handle = self.alloc(None);
        if let Ok(ManagedObject::Ordinary(o)) = self.get_mut(handle) {
            for (key, value) in entries {
                o.properties
                    .insert(key.into(), PropertyDescriptor::data(value));
            }
        }
        handle
    }

    // -- Slot access -----------------------------------------------------------

    /// Get a reference to a managed object.
    pub fn get(&self, handle: ObjectHandle) -> Result<&ManagedObject, ObjectError> {
        self.objects
            .get(handle.0 as usize)
            .ok_or(ObjectError::ObjectNotFound(handle))
    }

    /// Get a mutable reference to a managed object.
    pub fn get_mut(&mut self, handle: ObjectHandle) -> Result<&mut ManagedObject, ObjectError> {
        self.objects
            .get_mut(handle.0 as usize)
            .ok_or(ObjectError::ObjectNotFound(handle))
    }

    /// Number of objects allocated.
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Is the heap empty?
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    fn proxy_parts(
        &self,
        handle: ObjectHandle,
    ) -> Result<Option<(ObjectHandle, ProxyHandler)>, ObjectError> {
        Ok(self
            .get(handle)?
            .as_proxy()
            .map(|p| (p.target, p.handler.clone())))
    }

    /// Walk the prototype chain starting at `handle`, calling `visit` on each
    /// ordinary object until it yields a result or a proxy is reached.
    fn walk<T>(
        &self,
        handle: ObjectHandle,
        visit: impl Fn(&OrdinaryObject) -> Option<T>,
    ) -> Result<Lookup<T>, ObjectError> {
        let mut current = Some(handle);
        let mut depth: u32 = 0;
        let mut visited = BTreeSet::new();

        while let Some(h) = current {
            if depth > MAX_PROTOTYPE_CHAIN_DEPTH {
                return Err(ObjectError::PrototypeChainTooDeep {
                    depth,
                    max: MAX_PROTOTYPE_CHAIN_DEPTH,
                });
            }
            if !visited.insert(h) {
                return Err(ObjectError::PrototypeCycleDetected);
            }
            match self.get(h)? {
                ManagedObject::Ordinary(o) => {
                    if let Some(found) = visit(o) {
                        return Ok(Lookup::Found(found));
                    }
                    current = o.prototype;
                }
                ManagedObject::Proxy(p) => {
                    return Ok(Lookup::Proxy(p.target, p.handler.clone()));
                }
            }
            depth += 1;
        }
        Ok(Lookup::Missing)
    }

    // -- Callability -------------------------------------------------------------

    /// Is `handle` callable? A proxy is callable iff its target is.
    pub fn is_callable(&self, handle: ObjectHandle) -> Result<bool, ObjectError> {
        match self.get(handle)? {
            ManagedObject::Ordinary(o) => Ok(o.call.is_some()),
            ManagedObject::Proxy(p) => self.is_callable(p.target),
        }
    }

    /// Is `handle` a constructor? A proxy is a constructor iff its target is.
    pub fn is_constructor(&self, handle: ObjectHandle) -> Result<bool, ObjectError> {
        match self.get(handle)? {
            ManagedObject::Ordinary(o) => Ok(o.call.is_some() && o.constructable),
            ManagedObject::Proxy(p) => self.is_constructor(p.target),
        }
    }

    /// `typeof value`, distinguishing callables.
    pub fn type_of(&self, value: &JsValue) -> Result<&'static str, ObjectError> {
        match value {
            JsValue::Object(h) if self.is_callable(*h)? => Ok("function"),
            other => Ok(other.type_name()),
        }
    }

    // -- [[Get]] / [[Set]] ---------------------------------------------------------

    /// `[[Get]](O, P)` with `O` as the receiver.
    pub fn get_property(
        &mut self,
        handle: ObjectHandle,
        key: &PropertyKey,
    ) -> Result<JsValue, ObjectError> {
        self.get_property_with_receiver(handle, key, &JsValue::Object(handle))
    }

    /// `[[Get]](O, P, Receiver)` — walks the prototype chain; accessor
    /// getters run with `receiver` as `this`.
    pub fn get_property_with_receiver(
        &mut self,
        handle: ObjectHandle,
        key: &PropertyKey,
        receiver: &JsValue,
    ) -> Result<JsValue, ObjectError> {
        let lookup = self.walk(handle, |o| o.get_own_property(key).cloned())?;
        match lookup {
            Lookup::Found(PropertyDescriptor::Data { value, .. }) => Ok(value),
            Lookup::Found(PropertyDescriptor::Accessor { get, .. }) => match get {
                Some(getter) => self.call(getter, receiver.clone(), &[]),
                None => Ok(JsValue::Undefined),
            },
            Lookup::Proxy(target, handler) => match handler.get {
                Some(trap) => trap(self, target, key, receiver),
                None => self.get_property_with_receiver(target, key, receiver),
            },
            Lookup::Missing => Ok(JsValue::Undefined),
        }
    }

    /// `[[Set]](O, P, V)` with `O` as the receiver.
    pub fn set_property(
        &mut self,
        handle: ObjectHandle,
        key: PropertyKey,
        value: JsValue,
    ) -> Result<bool, ObjectError> {
        self.set_property_with_receiver(handle, key, value, &JsValue::Object(handle))
    }

    /// `[[Set]](O, P, V, Receiver)` — walks the prototype chain from `O`.
    /// An accessor setter found on the way runs with `receiver` as `this`; a
    /// proxy on the way receives the write through its `set` trap; otherwise
    /// the value lands as an own data property of `receiver`. Returns `false`
    /// when the write is rejected.
    pub fn set_property_with_receiver(
        &mut self,
        handle: ObjectHandle,
        key: PropertyKey,
        value: JsValue,
        receiver: &JsValue,
    ) -> Result<bool, ObjectError> {
        let lookup = self.walk(handle, |o| o.get_own_property(&key).cloned())?;
        match lookup {
            Lookup::Proxy(target, handler) => match handler.set {
                Some(trap) => trap(self, target, &key, value, receiver),
                None => self.set_property_with_receiver(target, key, value, receiver),
            },
            Lookup::Found(PropertyDescriptor::Accessor { set, .. }) => match set {
                Some(f) => self.call(f, receiver.clone(), &[value]).map(|_| true),
                None => Ok(false),
            },
            Lookup::Found(PropertyDescriptor::Data {
                writable: false, ..
            }) => Ok(false),
            Lookup::Found(PropertyDescriptor::Data { .. }) | Lookup::Missing => {
                self.write_own_data(receiver, key, value)
            }
        }
    }

    /// Final step of `[[Set]]`: update or create the own data property `key`
    /// on `receiver`.
    fn write_own_data(
        &mut self,
        receiver: &JsValue,
        key: PropertyKey,
        value: JsValue,
    ) -> Result<bool, ObjectError> {
        let Some(handle) = receiver.as_object() else {
            return Ok(false);
        };
        match self.get_own_property_descriptor(handle, &key)? {
            Some(PropertyDescriptor::Data {
                writable: true,
                enumerable,
                configurable,
                ..
            }) => self.define_property(
                handle,
                key,
                PropertyDescriptor::Data {
                    value,
                    writable: true,
                    enumerable,
                    configurable,
                },
            ),
            Some(_) => Ok(false),
            None => self.define_property(handle, key, PropertyDescriptor::data(value)),
        }
    }

    // -- Structural operations ---------------------------------------------------

    /// `[[HasProperty]](O, P)` — walks the prototype chain.
    pub fn has_property(
        &mut self,
        handle: ObjectHandle,
        key: &PropertyKey,
    ) -> Result<bool, ObjectError> {
        match self.walk(handle, |o| o.has_own_property(key).then_some(()))? {
            Lookup::Found(()) => Ok(true),
            Lookup::Proxy(target, handler) => match handler.has {
                Some(trap) => trap(self, target, key),
                None => self.has_property(target, key),
            },
            Lookup::Missing => Ok(false),
        }
    }

    /// `[[Delete]](O, P)`.
    pub fn delete_property(
        &mut self,
        handle: ObjectHandle,
        key: &PropertyKey,
    ) -> Result<bool, ObjectError> {
        if let Some((target, handler)) = self.proxy_parts(handle)? {
            return match handler.delete_property {
                Some(trap) => trap(self, target, key),
                None => self.delete_property(target, key),
            };
        }
        match self.get_mut(handle)? {
            ManagedObject::Ordinary(o) => Ok(o.delete(key)),
            ManagedObject::Proxy(_) => Ok(false),
        }
    }

    /// `[[DefineOwnProperty]](O, P, Desc)`.
    pub fn define_property(
        &mut self,
        handle: ObjectHandle,
        key: PropertyKey,
        desc: PropertyDescriptor,
    ) -> Result<bool, ObjectError> {
        if let Some((target, handler)) = self.proxy_parts(handle)? {
            return match handler.define_property {
                Some(trap) => trap(self, target, key, desc),
                None => self.define_property(target, key, desc),
            };
        }
        match self.get_mut(handle)? {
            ManagedObject::Ordinary(o) => Ok(o.define_own_property(key, desc)),
            ManagedObject::Proxy(_) => Ok(false),
        }
    }

    /// `[[OwnPropertyKeys]](O)`.
    pub fn own_keys(&mut self, handle: ObjectHandle) -> Result<Vec<PropertyKey>, ObjectError> {
        if let Some((target, handler)) = self.proxy_parts(handle)? {
            return match handler.own_keys {
                Some(trap) => trap(self, target),
                None => self.own_keys(target),
            };
        }
        match self.get(handle)? {
            ManagedObject::Ordinary(o) => Ok(o.own_property_keys()),
            ManagedObject::Proxy(_) => Ok(Vec::new()),
        }
    }

    /// `[[GetOwnProperty]](O, P)`.
    pub fn get_own_property_descriptor(
        &mut self,
        handle: ObjectHandle,
        key: &PropertyKey,
    ) -> Result<Option<PropertyDescriptor>, ObjectError> {
        if let Some((target, handler)) = self.proxy_parts(handle)? {
            return match handler.get_own_property_descriptor {
                Some(trap) => trap(self, target, key),
                None => self.get_own_property_descriptor(target, key),
            };
        }
        match self.get(handle)? {
            ManagedObject::Ordinary(o) => Ok(o.get_own_property(key).cloned()),
            ManagedObject::Proxy(_) => Ok(None),
        }
    }

    /// `[[GetPrototypeOf]](O)`.
    pub fn get_prototype_of(
        &mut self,
        handle: ObjectHandle,
    ) -> Result<Option<ObjectHandle>, ObjectError> {
        if let Some((target, handler)) = self.proxy_parts(handle)? {
            return match handler.get_prototype_of {
                Some(trap) => trap(self, target),
                None => self.get_prototype_of(target),
            };
        }
        match self.get(handle)? {
            ManagedObject::Ordinary(o) => Ok(o.prototype),
            ManagedObject::Proxy(_) => Ok(None),
        }
    }

    /// `[[SetPrototypeOf]](O, V)` — rejects cycles through ordinary objects.
    /// Proxies forward to their target.
    pub fn set_prototype_of(
        &mut self,
        handle: ObjectHandle,
        proto: Option<ObjectHandle>,
    ) -> Result<bool, ObjectError> {
        if let Some((target, _)) = self.proxy_parts(handle)? {
            return self.set_prototype_of(target, proto);
        }
        let mut current = proto;
        while let Some(h) = current {
            if h == handle {
                return Err(ObjectError::PrototypeCycleDetected);
            }
            current = match self.get(h)? {
                ManagedObject::Ordinary(o) => o.prototype,
                ManagedObject::Proxy(_) => None,
            };
        }
        match self.get_mut(handle)? {
            ManagedObject::Ordinary(o) if o.extensible || o.prototype == proto => {
                o.prototype = proto;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// `Object.keys(O)` — enumerable own string keys, routed through proxy
    /// traps so a wrapper lists the same keys as its source.
    pub fn keys(&mut self, handle: ObjectHandle) -> Result<Vec<String>, ObjectError> {
        let mut result = Vec::new();
        for key in self.own_keys(handle)? {
            let PropertyKey::String(name) = &key else {
                continue;
            };
            if self
                .get_own_property_descriptor(handle, &key)?
                .is_some_and(|d| d.is_enumerable())
            {
                result.push(name.clone());
            }
        }
        Ok(result)
    }

    /// `Object.entries(O)` — enumerable own `[key, value]` pairs.
    pub fn entries(&mut self, handle: ObjectHandle) -> Result<Vec<(String, JsValue)>, ObjectError> {
        let mut result = Vec::new();
        for name in self.keys(handle)? {
            let value = self.get_property(handle, &PropertyKey::String(name.clone()))?;
            result.push((name, value));
        }
        Ok(result)
    }

    // -- [[Call]] / [[Construct]] ----------------------------------------------------

    /// `[[Call]](F, thisArgument, argumentsList)`.
    pub fn call(
        &mut self,
        handle: ObjectHandle,
        this: JsValue,
        args: &[JsValue],
    ) -> Result<JsValue, ObjectError> {
        if !self.is_callable(handle)? {
            return Err(ObjectError::NotCallable(JsValue::Object(handle)));
        }
        match self.get(handle)? {
            ManagedObject::Proxy(p) => {
                let (target, trap) = (p.target, p.handler.apply.clone());
                match trap {
                    Some(trap) => trap(self, target, &this, args),
                    None => self.call(target, this, args),
                }
            }
            ManagedObject::Ordinary(o) => match o.call.clone() {
                Some(body) => body.invoke(self, &this, args),
                None => Err(ObjectError::NotCallable(JsValue::Object(handle))),
            },
        }
    }

    /// `new F(...args)` — `F` is also the new target.
    pub fn construct(
        &mut self,
        handle: ObjectHandle,
        args: &[JsValue],
    ) -> Result<JsValue, ObjectError> {
        self.construct_with_new_target(handle, args, handle)
    }

    /// `[[Construct]](F, argumentsList, newTarget)`.
    pub fn construct_with_new_target(
        &mut self,
        handle: ObjectHandle,
        args: &[JsValue],
        new_target: ObjectHandle,
    ) -> Result<JsValue, ObjectError> {
        if !self.is_constructor(handle)? {
            return Err(ObjectError::NotConstructor(JsValue::Object(handle)));
        }
        match self.get(handle)? {
            ManagedObject::Proxy(p) => {
                let (target, trap) = (p.target, p.handler.construct.clone());
                match trap {
                    Some(trap) => trap(self, target, args, new_target),
                    None => self.construct_with_new_target(target, args, new_target),
                }
            }
            ManagedObject::Ordinary(o) => match o.call.clone() {
                Some(body) => self.construct_native(&body, args, new_target),
                None => Err(ObjectError::NotConstructor(JsValue::Object(handle))),
            },
        }
    }

    /// Ordinary `[[Construct]]` over a native body: the instance's prototype
    /// comes from `new_target.prototype`; an object returned by the body
    /// replaces the fresh instance.
    pub fn construct_native(
        &mut self,
        body: &NativeFunction,
        args: &[JsValue],
        new_target: ObjectHandle,
    ) -> Result<JsValue, ObjectError> {
        let proto = self
            .get_property(new_target, &"prototype".into())?
            .as_object();
        let instance = JsValue::Object(self.alloc(proto));
        let result = body.invoke(self, &instance, args)?;
        if result.is_object() {
            Ok(result)
        } else {
            Ok(instance)
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
