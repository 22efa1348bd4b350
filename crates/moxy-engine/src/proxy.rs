//! Proxy trap sets and the middleware chain that decorates them.
//!
//! A [`ProxyHandler`] is a bag of optional trap closures. The heap consults
//! the matching trap for every operation on a proxy and forwards to the
//! proxy target when the slot is empty, so a middleware can replace one trap
//! and leave the rest untouched.

use std::fmt;
use std::rc::Rc;

use crate::mock::Mock;
use crate::object_model::{
    HostHandle, JsValue, ObjectError, ObjectHandle, ObjectHeap, PropertyDescriptor, PropertyKey,
};

/// `get(heap, target, key, receiver)`.
pub type GetTrap =
    Rc<dyn Fn(&mut ObjectHeap, ObjectHandle, &PropertyKey, &JsValue) -> Result<JsValue, ObjectError>>;
/// `set(heap, target, key, value, receiver)`; `Ok(false)` rejects the write.
pub type SetTrap = Rc<
    dyn Fn(&mut ObjectHeap, ObjectHandle, &PropertyKey, JsValue, &JsValue) -> Result<bool, ObjectError>,
>;
/// `has`/`deleteProperty(heap, target, key)`.
pub type KeyTrap = Rc<dyn Fn(&mut ObjectHeap, ObjectHandle, &PropertyKey) -> Result<bool, ObjectError>>;
/// `defineProperty(heap, target, key, descriptor)`.
pub type DefinePropertyTrap = Rc<
    dyn Fn(&mut ObjectHeap, ObjectHandle, PropertyKey, PropertyDescriptor) -> Result<bool, ObjectError>,
>;
/// `ownKeys(heap, target)`.
pub type OwnKeysTrap = Rc<dyn Fn(&mut ObjectHeap, ObjectHandle) -> Result<Vec<PropertyKey>, ObjectError>>;
/// `getOwnPropertyDescriptor(heap, target, key)`.
pub type DescriptorTrap = Rc<
    dyn Fn(&mut ObjectHeap, ObjectHandle, &PropertyKey) -> Result<Option<PropertyDescriptor>, ObjectError>,
>;
/// `getPrototypeOf(heap, target)`.
pub type PrototypeTrap =
    Rc<dyn Fn(&mut ObjectHeap, ObjectHandle) -> Result<Option<ObjectHandle>, ObjectError>>;
/// `apply(heap, target, this, args)`.
pub type ApplyTrap =
    Rc<dyn Fn(&mut ObjectHeap, ObjectHandle, &JsValue, &[JsValue]) -> Result<JsValue, ObjectError>>;
/// `construct(heap, target, args, new_target)`.
pub type ConstructTrap =
    Rc<dyn Fn(&mut ObjectHeap, ObjectHandle, &[JsValue], ObjectHandle) -> Result<JsValue, ObjectError>>;

/// The trap set installed on a proxy.
#[derive(Clone, Default)]
pub struct ProxyHandler {
    pub get: Option<GetTrap>,
    pub set: Option<SetTrap>,
    pub has: Option<KeyTrap>,
    pub delete_property: Option<KeyTrap>,
    pub define_property: Option<DefinePropertyTrap>,
    pub own_keys: Option<OwnKeysTrap>,
    pub get_own_property_descriptor: Option<DescriptorTrap>,
    pub get_prototype_of: Option<PrototypeTrap>,
    pub apply: Option<ApplyTrap>,
    pub construct: Option<ConstructTrap>,
    /// Host slot of the engine that installed this trap set, if any. Lets the
    /// engine be found from the proxy without running a trap.
    pub owner: Option<HostHandle>,
}

impl ProxyHandler {
    /// Names of the populated traps, in declaration order.
    pub fn trap_names(&self) -> Vec<&'static str> {
        [
            ("get", self.get.is_some()),
            ("set", self.set.is_some()),
            ("has", self.has.is_some()),
            ("deleteProperty", self.delete_property.is_some()),
            ("defineProperty", self.define_property.is_some()),
            ("ownKeys", self.own_keys.is_some()),
            (
                "getOwnPropertyDescriptor",
                self.get_own_property_descriptor.is_some(),
            ),
            ("getPrototypeOf", self.get_prototype_of.is_some()),
            ("apply", self.apply.is_some()),
            ("construct", self.construct.is_some()),
        ]
        .into_iter()
        .filter_map(|(name, present)| present.then_some(name))
        .collect()
    }
}

impl fmt::Debug for ProxyHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyHandler")
            .field("traps", &self.trap_names())
            .field("owner", &self.owner)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Middleware
// ---------------------------------------------------------------------------

type MiddlewareFn = dyn Fn(ProxyHandler, &Mock) -> ProxyHandler;

/// Transforms the trap set of a mock before its proxy is created.
///
/// Middlewares compare by identity, so the same middleware listed in two
/// option layers is still two entries after merging.
#[derive(Clone)]
pub struct Middleware(Rc<MiddlewareFn>);

impl Middleware {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(ProxyHandler, &Mock) -> ProxyHandler + 'static,
    {
        Self(Rc::new(f))
    }

    pub fn apply(&self, handler: ProxyHandler, mock: &Mock) -> ProxyHandler {
        (self.0)(handler, mock)
    }
}

impl PartialEq for Middleware {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Middleware {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Middleware({:p})", Rc::as_ptr(&self.0))
    }
}

/// Fold `middlewares` over `base` left-to-right; the last one ends up
/// outermost.
pub fn apply_middlewares(
    base: ProxyHandler,
    middlewares: &[Middleware],
    mock: &Mock,
) -> ProxyHandler {
    middlewares
        .iter()
        .fold(base, |handler, middleware| middleware.apply(handler, mock))
}
