//! Integration tests for the mock engine, driven through the public API the
//! way a test suite would use it: wrap a value, poke it through the heap,
//! then inspect the engine.
//!
//! Focus areas:
//! - Transparency of reads, writes, calls and constructions
//! - Call recording order and record contents
//! - Stub precedence for calls, getters and setters
//! - Nested wrapping, identity stability and the include/exclude filter
//! - reset vs clear
//! - Error passthrough
//! - The reserved access key
//! - Middlewares
//! - Structural introspection through the wrapper

use std::cell::RefCell;
use std::rc::Rc;

use moxy_engine::object_model::PropertyDescriptor;
use moxy_engine::proxy::GetTrap;
use moxy_engine::{
    JsValue, Middleware, Mock, MockOptionsInput, NativeFunction, ObjectError, ObjectHandle,
    ObjectHeap, PropertyKey, ProxyHandler, factory,
};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn str_key(s: &str) -> PropertyKey {
    PropertyKey::String(s.to_string())
}

fn int_val(n: i64) -> JsValue {
    JsValue::Int(n)
}

fn str_val(s: &str) -> JsValue {
    JsValue::Str(s.to_string())
}

fn plain(heap: &mut ObjectHeap, entries: &[(&str, JsValue)]) -> ObjectHandle {
    heap.from_entries(entries.iter().cloned())
}

fn wrap(
    heap: &mut ObjectHeap,
    source: ObjectHandle,
    options: MockOptionsInput,
) -> (ObjectHandle, Mock) {
    let mock = Mock::new(options);
    let wrapped = mock.proxify(heap, &JsValue::Object(source)).unwrap();
    (wrapped.as_object().unwrap(), mock)
}

fn get(heap: &mut ObjectHeap, handle: ObjectHandle, key: &str) -> JsValue {
    heap.get_property(handle, &str_key(key)).unwrap()
}

fn get_object(heap: &mut ObjectHeap, handle: ObjectHandle, key: &str) -> ObjectHandle {
    get(heap, handle, key).as_object().unwrap()
}

/// `function sum(a, b) { return a + b + ... }` over integer arguments.
fn sum_fn(heap: &mut ObjectHeap) -> ObjectHandle {
    heap.alloc_function(
        "sum",
        2,
        NativeFunction::new(|_, _, args| {
            Ok(JsValue::Int(
                args.iter()
                    .map(|a| match a {
                        JsValue::Int(n) => *n,
                        _ => 0,
                    })
                    .sum(),
            ))
        }),
    )
}

/// `function Point(x) { this.x = x }`.
fn point_ctor(heap: &mut ObjectHeap) -> ObjectHandle {
    heap.alloc_function(
        "Point",
        1,
        NativeFunction::new(|heap, this, args| {
            if let Some(instance) = this.as_object() {
                let x = args.first().cloned().unwrap_or(JsValue::Undefined);
                heap.set_property(instance, "x".into(), x)?;
            }
            Ok(JsValue::Undefined)
        }),
    )
}

fn call(
    heap: &mut ObjectHeap,
    f: ObjectHandle,
    args: &[JsValue],
) -> Result<JsValue, ObjectError> {
    heap.call(f, JsValue::Undefined, args)
}

// ===========================================================================
// 1. Transparency
// ===========================================================================

#[test]
fn reads_match_source_when_proxification_disabled() {
    let mut heap = ObjectHeap::new();
    let inner = plain(&mut heap, &[("deep", int_val(1))]);
    let source = plain(
        &mut heap,
        &[("a", int_val(1)), ("b", str_val("x")), ("c", JsValue::Object(inner))],
    );
    let (wrapped, _) = wrap(
        &mut heap,
        source,
        MockOptionsInput::default().with_proxify_properties(false),
    );

    assert_ne!(wrapped, source);
    for key in ["a", "b", "c", "missing"] {
        assert_eq!(get(&mut heap, wrapped, key), get(&mut heap, source, key));
    }
}

#[test]
fn wrapper_spreads_like_its_source() {
    let mut heap = ObjectHeap::new();
    let source = plain(&mut heap, &[("foo", str_val("bar")), ("n", int_val(2))]);
    let (wrapped, _) = wrap(&mut heap, source, MockOptionsInput::default());

    assert_eq!(heap.keys(wrapped).unwrap(), heap.keys(source).unwrap());
    assert_eq!(heap.entries(wrapped).unwrap(), heap.entries(source).unwrap());
}

#[test]
fn accessor_on_source_runs_against_source() {
    let mut heap = ObjectHeap::new();
    let source = plain(&mut heap, &[("first", str_val("Ada"))]);
    let getter = heap.alloc_non_constructor(
        "get full",
        0,
        NativeFunction::new(|heap, this, _| match this.as_object() {
            Some(h) => heap.get_property(h, &"first".into()),
            None => Ok(JsValue::Undefined),
        }),
    );
    heap.define_property(
        source,
        str_key("full"),
        PropertyDescriptor::Accessor {
            get: Some(getter),
            set: None,
            enumerable: true,
            configurable: true,
        },
    )
    .unwrap();
    let (wrapped, _) = wrap(&mut heap, source, MockOptionsInput::default());

    assert_eq!(get(&mut heap, wrapped, "full"), str_val("Ada"));
}

// ===========================================================================
// 2. Calls
// ===========================================================================

#[test]
fn calls_recorded_in_order_with_args_and_results() {
    let mut heap = ObjectHeap::new();
    let source = sum_fn(&mut heap);
    let (wrapped, mock) = wrap(&mut heap, source, MockOptionsInput::default());

    assert_eq!(call(&mut heap, wrapped, &[int_val(1), int_val(2)]).unwrap(), int_val(3));
    let this = JsValue::Object(heap.alloc_plain());
    assert_eq!(heap.call(wrapped, this.clone(), &[int_val(5)]).unwrap(), int_val(5));
    assert_eq!(call(&mut heap, wrapped, &[]).unwrap(), int_val(0));

    let calls = mock.calls();
    assert_eq!(calls.len(), 3);
    assert_eq!(calls[0].args, vec![int_val(1), int_val(2)]);
    assert_eq!(calls[0].result, int_val(3));
    assert_eq!(calls[0].instance, JsValue::Undefined);
    assert_eq!(calls[1].instance, this);
    assert!(calls[2].args.is_empty());
    assert!(calls.iter().all(|c| !c.is_constructor && !c.is_throw()));
}

#[test]
fn calls_returns_a_snapshot() {
    let mut heap = ObjectHeap::new();
    let source = sum_fn(&mut heap);
    let (wrapped, mock) = wrap(&mut heap, source, MockOptionsInput::default());

    call(&mut heap, wrapped, &[int_val(1)]).unwrap();
    let snapshot = mock.calls();
    call(&mut heap, wrapped, &[int_val(2)]).unwrap();
    assert_eq!(snapshot.len(), 1);
    assert_eq!(mock.calls().len(), 2);
}

#[test]
fn stub_precedence_queue_then_default_then_real() {
    let mut heap = ObjectHeap::new();
    let source = sum_fn(&mut heap);
    let (wrapped, mock) = wrap(&mut heap, source, MockOptionsInput::default());

    mock.fake_once(|_, _, _| Ok(int_val(100)));
    mock.fake(|_, _, _| Ok(int_val(200)));
    assert_eq!(call(&mut heap, wrapped, &[int_val(1)]).unwrap(), int_val(100));
    assert_eq!(call(&mut heap, wrapped, &[int_val(1)]).unwrap(), int_val(200));
    assert_eq!(call(&mut heap, wrapped, &[int_val(1)]).unwrap(), int_val(200));
}

#[test]
fn fake_return_value_once_falls_back_to_real() {
    let mut heap = ObjectHeap::new();
    let source = sum_fn(&mut heap);
    let (wrapped, mock) = wrap(&mut heap, source, MockOptionsInput::default());

    mock.fake_return_value_once("a");
    mock.fake_return_value_once("b");
    assert_eq!(call(&mut heap, wrapped, &[int_val(2)]).unwrap(), str_val("a"));
    assert_eq!(call(&mut heap, wrapped, &[int_val(2)]).unwrap(), str_val("b"));
    assert_eq!(call(&mut heap, wrapped, &[int_val(2)]).unwrap(), int_val(2));
}

#[test]
fn stub_receives_args_and_this() {
    let mut heap = ObjectHeap::new();
    let source = sum_fn(&mut heap);
    let (wrapped, mock) = wrap(&mut heap, source, MockOptionsInput::default());
    let seen: Rc<RefCell<Vec<(JsValue, Vec<JsValue>)>>> = Rc::new(RefCell::new(Vec::new()));
    let log = Rc::clone(&seen);
    mock.fake(move |_, this, args| {
        log.borrow_mut().push((this.clone(), args.to_vec()));
        Ok(int_val(args.len() as i64))
    });

    let this = JsValue::Object(heap.alloc_plain());
    assert_eq!(heap.call(wrapped, this.clone(), &[]).unwrap(), int_val(0));
    assert_eq!(heap.call(wrapped, this.clone(), &[int_val(7)]).unwrap(), int_val(1));
    assert_eq!(
        *seen.borrow(),
        vec![(this.clone(), Vec::new()), (this, vec![int_val(7)])]
    );
}

#[test]
fn stub_returning_an_object_is_wrapped() {
    let mut heap = ObjectHeap::new();
    let source = sum_fn(&mut heap);
    let (wrapped, mock) = wrap(&mut heap, source, MockOptionsInput::default());
    mock.fake(|_, this, _| Ok(this.clone()));

    let this = JsValue::Object(heap.alloc_plain());
    let returned = heap.call(wrapped, this.clone(), &[]).unwrap();
    assert_ne!(returned, this);
    assert_eq!(heap.call(wrapped, this.clone(), &[]).unwrap(), returned);

    let (raw, raw_mock) = wrap(
        &mut heap,
        source,
        MockOptionsInput::default().with_proxify_return_value(false),
    );
    raw_mock.fake(|_, this, _| Ok(this.clone()));
    assert_eq!(heap.call(raw, this.clone(), &[]).unwrap(), this);
}

#[test]
fn returned_objects_are_wrapped_once() {
    let mut heap = ObjectHeap::new();
    let shared = plain(&mut heap, &[("v", int_val(1))]);
    let source = heap.alloc_function("make", 0, NativeFunction::returning(JsValue::Object(shared)));
    let (wrapped, mock) = wrap(&mut heap, source, MockOptionsInput::default());

    let first = call(&mut heap, wrapped, &[]).unwrap();
    let second = call(&mut heap, wrapped, &[]).unwrap();
    assert_ne!(first, JsValue::Object(shared));
    assert_eq!(first, second);
    assert_eq!(mock.calls()[0].result, first);
    assert_eq!(get(&mut heap, first.as_object().unwrap(), "v"), int_val(1));
}

#[test]
fn returned_objects_stay_raw_when_disabled() {
    let mut heap = ObjectHeap::new();
    let shared = heap.alloc_plain();
    let source = heap.alloc_function("make", 0, NativeFunction::returning(JsValue::Object(shared)));
    let (wrapped, _) = wrap(
        &mut heap,
        source,
        MockOptionsInput::default().with_proxify_return_value(false),
    );
    assert_eq!(call(&mut heap, wrapped, &[]).unwrap(), JsValue::Object(shared));
}

#[test]
fn calling_a_wrapped_plain_object_fails_without_recording() {
    let mut heap = ObjectHeap::new();
    let source = heap.alloc_plain();
    let (wrapped, mock) = wrap(&mut heap, source, MockOptionsInput::default());

    assert!(matches!(
        call(&mut heap, wrapped, &[]),
        Err(ObjectError::NotCallable(_))
    ));
    assert!(mock.calls().is_empty());
}

// ===========================================================================
// 3. Constructions
// ===========================================================================

#[test]
fn construct_wraps_instance_and_records_it() {
    let mut heap = ObjectHeap::new();
    let source = point_ctor(&mut heap);
    let (wrapped, mock) = wrap(&mut heap, source, MockOptionsInput::default());

    let instance = heap.construct(wrapped, &[int_val(4)]).unwrap();
    let instance_handle = instance.as_object().unwrap();
    assert_eq!(get(&mut heap, instance_handle, "x"), int_val(4));

    let source_proto = get_object(&mut heap, source, "prototype");
    assert_eq!(heap.get_prototype_of(instance_handle).unwrap(), Some(source_proto));

    let calls = mock.calls();
    assert_eq!(calls.len(), 1);
    assert!(calls[0].is_constructor);
    assert_eq!(calls[0].args, vec![int_val(4)]);
    assert_eq!(calls[0].instance, instance);

    let engine = Mock::lookup(&mut heap, &instance, &str_key("mock")).unwrap();
    assert!(engine.is_some_and(|child| child != mock));
}

#[test]
fn construct_returns_raw_instance_when_disabled() {
    let mut heap = ObjectHeap::new();
    let source = point_ctor(&mut heap);
    let (wrapped, _) = wrap(
        &mut heap,
        source,
        MockOptionsInput::default().with_proxify_new_instance(false),
    );

    let instance = heap.construct(wrapped, &[int_val(1)]).unwrap();
    let engine = Mock::lookup(&mut heap, &instance, &str_key("mock")).unwrap();
    assert!(engine.is_none());
}

#[test]
fn construct_uses_stub_body() {
    let mut heap = ObjectHeap::new();
    let source = point_ctor(&mut heap);
    let (wrapped, mock) = wrap(
        &mut heap,
        source,
        MockOptionsInput::default().with_proxify_new_instance(false),
    );
    mock.fake_once(|heap, this, _| {
        if let Some(instance) = this.as_object() {
            heap.set_property(instance, "x".into(), int_val(-1))?;
        }
        Ok(JsValue::Undefined)
    });

    let stubbed = heap.construct(wrapped, &[int_val(9)]).unwrap();
    let real = heap.construct(wrapped, &[int_val(9)]).unwrap();
    assert_eq!(get(&mut heap, stubbed.as_object().unwrap(), "x"), int_val(-1));
    assert_eq!(get(&mut heap, real.as_object().unwrap(), "x"), int_val(9));
}

#[test]
fn construct_non_constructor_source_is_recorded_error() {
    let mut heap = ObjectHeap::new();
    let source = heap.alloc_non_constructor("arrow", 0, NativeFunction::returning(JsValue::Undefined));
    let (wrapped, mock) = wrap(&mut heap, source, MockOptionsInput::default());

    let err = heap.construct(wrapped, &[]).unwrap_err();
    assert_eq!(err, ObjectError::NotConstructor(JsValue::Object(source)));
    let calls = mock.calls();
    assert_eq!(calls.len(), 1);
    assert!(calls[0].is_constructor);
    assert_eq!(calls[0].error, Some(err));
}

// ===========================================================================
// 4. Getters and setters
// ===========================================================================

#[test]
fn reads_are_recorded_on_getter_mock() {
    let mut heap = ObjectHeap::new();
    let source = plain(&mut heap, &[("a", int_val(1))]);
    let (wrapped, mock) = wrap(&mut heap, source, MockOptionsInput::default());

    get(&mut heap, wrapped, "a");
    get(&mut heap, wrapped, "a");
    get(&mut heap, wrapped, "nope");

    let calls = mock.getter("a").calls();
    assert_eq!(calls.len(), 2);
    assert!(calls.iter().all(|c| c.args.is_empty()));
    assert_eq!(calls[0].result, int_val(1));
    assert_eq!(calls[0].instance, JsValue::Object(wrapped));
    assert_eq!(mock.getter("nope").calls()[0].result, JsValue::Undefined);
    assert!(mock.calls().is_empty());
}

#[test]
fn getter_stub_is_authoritative_then_consumed() {
    let mut heap = ObjectHeap::new();
    let source = plain(&mut heap, &[("a", int_val(1))]);
    let (wrapped, mock) = wrap(&mut heap, source, MockOptionsInput::default());
    mock.getter("a").fake_once(move |_, this, args| {
        assert_eq!(this, &JsValue::Object(wrapped));
        assert!(args.is_empty());
        Ok(int_val(5))
    });

    assert_eq!(get(&mut heap, wrapped, "a"), int_val(5));
    assert_eq!(get(&mut heap, wrapped, "a"), int_val(1));
}

#[test]
fn write_goes_to_stand_in_and_is_recorded() {
    let mut heap = ObjectHeap::new();
    let source = plain(&mut heap, &[("a", int_val(1))]);
    let (wrapped, mock) = wrap(&mut heap, source, MockOptionsInput::default());

    assert!(heap.set_property(wrapped, str_key("a"), int_val(3)).unwrap());
    assert_eq!(get(&mut heap, wrapped, "a"), int_val(3));
    assert_eq!(get(&mut heap, source, "a"), int_val(1));

    let calls = mock.setter("a").calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].args, vec![int_val(3)]);
    assert_eq!(calls[0].result, JsValue::Undefined);
    assert_eq!(calls[0].instance, JsValue::Object(wrapped));
}

#[test]
fn write_through_inheriting_object_reaches_set_trap() {
    let mut heap = ObjectHeap::new();
    let source = plain(&mut heap, &[("a", int_val(1))]);
    let (wrapped, mock) = wrap(&mut heap, source, MockOptionsInput::default());
    let child = heap.alloc(Some(wrapped));

    assert!(heap.set_property(child, str_key("a"), int_val(4)).unwrap());
    assert_eq!(get(&mut heap, wrapped, "a"), int_val(4));
    assert!(heap.get_own_property_descriptor(child, &str_key("a")).unwrap().is_none());

    let calls = mock.setter("a").calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].args, vec![int_val(4)]);
    assert_eq!(calls[0].instance, JsValue::Object(child));
}

#[test]
fn setter_stub_replaces_write() {
    let mut heap = ObjectHeap::new();
    let source = plain(&mut heap, &[("a", int_val(1))]);
    let (wrapped, mock) = wrap(&mut heap, source, MockOptionsInput::default());
    mock.setter("a").fake(|_, _, args| Ok(args[0].clone()));

    assert!(heap.set_property(wrapped, str_key("a"), int_val(8)).unwrap());
    assert_eq!(get(&mut heap, wrapped, "a"), int_val(1));
    assert_eq!(mock.setter("a").calls()[0].result, int_val(8));
}

// ===========================================================================
// 5. Access key
// ===========================================================================

#[test]
fn access_key_returns_engine_and_rejects_writes() {
    let mut heap = ObjectHeap::new();
    let source = plain(&mut heap, &[("mock", int_val(1))]);
    let (wrapped, mock) = wrap(&mut heap, source, MockOptionsInput::default());

    let value = get(&mut heap, wrapped, "mock");
    assert_eq!(Mock::from_value(&heap, &value), Some(mock.clone()));
    assert!(!heap.set_property(wrapped, str_key("mock"), int_val(2)).unwrap());
    assert!(mock.getter("mock").calls().is_empty());
    assert!(mock.setter("mock").calls().is_empty());
}

#[test]
fn symbol_access_key_frees_the_default_name() {
    let mut heap = ObjectHeap::new();
    let sym = heap.alloc_symbol();
    let source = plain(&mut heap, &[("mock", str_val("real"))]);
    let (wrapped, mock) = wrap(&mut heap, source, MockOptionsInput::default().with_access_key(sym));

    assert_eq!(get(&mut heap, wrapped, "mock"), str_val("real"));
    let found = Mock::lookup(&mut heap, &JsValue::Object(wrapped), &PropertyKey::Symbol(sym)).unwrap();
    assert_eq!(found, Some(mock));
}

// ===========================================================================
// 6. Nested wrapping
// ===========================================================================

#[test]
fn nested_reads_are_identity_stable() {
    let mut heap = ObjectHeap::new();
    let inner = plain(&mut heap, &[("x", int_val(1))]);
    let source = plain(&mut heap, &[("nested", JsValue::Object(inner))]);
    let (wrapped, mock) = wrap(&mut heap, source, MockOptionsInput::default());

    let first = get_object(&mut heap, wrapped, "nested");
    let second = get_object(&mut heap, wrapped, "nested");
    assert_eq!(first, second);
    assert_ne!(first, inner);
    assert_eq!(get(&mut heap, first, "x"), int_val(1));

    let child = Mock::lookup(&mut heap, &JsValue::Object(first), &str_key("mock"))
        .unwrap()
        .unwrap();
    assert_ne!(child, mock);
    assert_eq!(child.options(), mock.options());
    assert_eq!(child.getter("x").calls().len(), 1);
}

#[test]
fn cyclic_source_does_not_grow_wrappers() {
    let mut heap = ObjectHeap::new();
    let source = heap.alloc_plain();
    heap.set_property(source, str_key("me"), JsValue::Object(source)).unwrap();
    let (wrapped, _) = wrap(&mut heap, source, MockOptionsInput::default());

    let me = get_object(&mut heap, wrapped, "me");
    let before = heap.len();
    for _ in 0..10 {
        assert_eq!(get_object(&mut heap, wrapped, "me"), me);
    }
    assert_eq!(heap.len(), before);
}

#[test]
fn include_list_restricts_wrapping() {
    let mut heap = ObjectHeap::new();
    let x = heap.alloc_plain();
    let y = heap.alloc_plain();
    let source = plain(&mut heap, &[("x", JsValue::Object(x)), ("y", JsValue::Object(y))]);
    let (wrapped, _) = wrap(&mut heap, source, MockOptionsInput::default().include(["x"]));

    assert_ne!(get_object(&mut heap, wrapped, "x"), x);
    assert_eq!(get_object(&mut heap, wrapped, "y"), y);
}

#[test]
fn exclude_list_wins_over_include() {
    let mut heap = ObjectHeap::new();
    let x = heap.alloc_plain();
    let source = plain(&mut heap, &[("x", JsValue::Object(x))]);
    let (wrapped, _) = wrap(
        &mut heap,
        source,
        MockOptionsInput::default().include(["x"]).exclude(["x"]),
    );
    assert_eq!(get_object(&mut heap, wrapped, "x"), x);
}

#[test]
fn intrinsic_function_keys_come_from_source_unwrapped() {
    let mut heap = ObjectHeap::new();
    let source = sum_fn(&mut heap);
    let (wrapped, _) = wrap(&mut heap, source, MockOptionsInput::default());

    assert_eq!(get(&mut heap, wrapped, "name"), str_val("sum"));
    assert_eq!(get(&mut heap, wrapped, "length"), int_val(2));
    assert_eq!(get(&mut heap, wrapped, "prototype"), get(&mut heap, source, "prototype"));
}

// ===========================================================================
// 7. reset vs clear
// ===========================================================================

#[test]
fn clear_keeps_stub_reset_removes_it() {
    let mut heap = ObjectHeap::new();
    let source = sum_fn(&mut heap);
    let (wrapped, mock) = wrap(&mut heap, source, MockOptionsInput::default());
    mock.fake_return_value(int_val(20));

    assert_eq!(call(&mut heap, wrapped, &[int_val(1)]).unwrap(), int_val(20));
    mock.clear();
    assert!(mock.calls().is_empty());
    assert_eq!(call(&mut heap, wrapped, &[int_val(1)]).unwrap(), int_val(20));

    mock.reset();
    assert!(mock.calls().is_empty());
    assert_eq!(call(&mut heap, wrapped, &[int_val(1)]).unwrap(), int_val(1));
}

#[test]
fn clear_empties_sub_mocks_but_keeps_them() {
    let mut heap = ObjectHeap::new();
    let source = plain(&mut heap, &[("a", int_val(1))]);
    let (wrapped, mock) = wrap(&mut heap, source, MockOptionsInput::default());
    get(&mut heap, wrapped, "a");
    let getter = mock.getter("a");

    mock.clear();
    assert!(getter.calls().is_empty());
    assert_eq!(mock.getter("a"), getter);

    mock.reset();
    assert_ne!(mock.getter("a"), getter);
}

#[test]
fn clear_and_reset_drop_nested_wrappers() {
    let mut heap = ObjectHeap::new();
    let inner = heap.alloc_plain();
    let source = plain(&mut heap, &[("nested", JsValue::Object(inner))]);
    let (wrapped, mock) = wrap(&mut heap, source, MockOptionsInput::default());

    let first = get_object(&mut heap, wrapped, "nested");
    mock.clear();
    let second = get_object(&mut heap, wrapped, "nested");
    assert_ne!(first, second);
    mock.reset();
    let third = get_object(&mut heap, wrapped, "nested");
    assert_ne!(second, third);
}

// ===========================================================================
// 8. Error passthrough
// ===========================================================================

#[test]
fn stub_error_is_recorded_and_rethrown() {
    let mut heap = ObjectHeap::new();
    let source = sum_fn(&mut heap);
    let (wrapped, mock) = wrap(&mut heap, source, MockOptionsInput::default());
    mock.fake_once(|_, _, _| Err(ObjectError::thrown("boom")));

    let err = call(&mut heap, wrapped, &[int_val(1)]).unwrap_err();
    assert_eq!(err, ObjectError::Thrown(str_val("boom")));
    let calls = mock.calls();
    assert!(calls[0].is_throw());
    assert_eq!(calls[0].error, Some(err));
    assert_eq!(calls[0].result, JsValue::Undefined);

    assert_eq!(call(&mut heap, wrapped, &[int_val(1)]).unwrap(), int_val(1));
}

#[test]
fn source_error_is_recorded_and_rethrown() {
    let mut heap = ObjectHeap::new();
    let source = heap.alloc_function(
        "fail",
        0,
        NativeFunction::new(|_, _, _| Err(ObjectError::thrown(int_val(42)))),
    );
    let (wrapped, mock) = wrap(&mut heap, source, MockOptionsInput::default());

    assert_eq!(call(&mut heap, wrapped, &[]), Err(ObjectError::Thrown(int_val(42))));
    assert!(mock.calls()[0].is_throw());
}

#[test]
fn getter_error_is_recorded_and_rethrown() {
    let mut heap = ObjectHeap::new();
    let source = plain(&mut heap, &[("a", int_val(1))]);
    let (wrapped, mock) = wrap(&mut heap, source, MockOptionsInput::default());
    mock.getter("a").fake(|_, _, _| Err(ObjectError::thrown("no read")));

    let err = heap.get_property(wrapped, &str_key("a")).unwrap_err();
    assert_eq!(err, ObjectError::Thrown(str_val("no read")));
    assert_eq!(mock.getter("a").calls()[0].error, Some(err));
}

#[test]
fn setter_error_is_recorded_and_rethrown() {
    let mut heap = ObjectHeap::new();
    let source = heap.alloc_plain();
    let (wrapped, mock) = wrap(&mut heap, source, MockOptionsInput::default());
    mock.setter("a").fake_once(|_, _, _| Err(ObjectError::thrown("no write")));

    assert!(heap.set_property(wrapped, str_key("a"), int_val(1)).is_err());
    assert!(mock.setter("a").calls()[0].is_throw());
    assert!(heap.set_property(wrapped, str_key("a"), int_val(1)).unwrap());
}

// ===========================================================================
// 9. Structural introspection
// ===========================================================================

#[test]
fn structure_matches_source() {
    let mut heap = ObjectHeap::new();
    let proto = plain(&mut heap, &[("inherited", int_val(0))]);
    let source = heap.alloc(Some(proto));
    heap.set_property(source, str_key("a"), int_val(1)).unwrap();
    let (wrapped, _) = wrap(&mut heap, source, MockOptionsInput::default());

    assert!(heap.has_property(wrapped, &str_key("a")).unwrap());
    assert!(heap.has_property(wrapped, &str_key("inherited")).unwrap());
    assert!(!heap.has_property(wrapped, &str_key("zzz")).unwrap());
    assert_eq!(heap.own_keys(wrapped).unwrap(), vec![str_key("a")]);
    assert_eq!(
        heap.get_own_property_descriptor(wrapped, &str_key("a")).unwrap(),
        Some(PropertyDescriptor::data(int_val(1)))
    );
    assert_eq!(heap.get_prototype_of(wrapped).unwrap(), Some(proto));
    assert_eq!(heap.type_of(&JsValue::Object(wrapped)).unwrap(), "object");
}

#[test]
fn written_keys_join_the_shape() {
    let mut heap = ObjectHeap::new();
    let source = plain(&mut heap, &[("a", int_val(1))]);
    let (wrapped, _) = wrap(&mut heap, source, MockOptionsInput::default());
    heap.set_property(wrapped, str_key("z"), int_val(2)).unwrap();

    let keys = heap.own_keys(wrapped).unwrap();
    assert!(keys.contains(&str_key("a")));
    assert!(keys.contains(&str_key("z")));
    assert!(heap.has_property(wrapped, &str_key("z")).unwrap());
    assert!(!heap.has_property(source, &str_key("z")).unwrap());
}

#[test]
fn callable_own_keys_are_deduplicated() {
    let mut heap = ObjectHeap::new();
    let source = sum_fn(&mut heap);
    heap.set_property(source, str_key("extra"), int_val(1)).unwrap();
    let (wrapped, _) = wrap(&mut heap, source, MockOptionsInput::default());

    let keys = heap.own_keys(wrapped).unwrap();
    for key in ["name", "length", "prototype", "extra"] {
        assert_eq!(keys.iter().filter(|k| **k == str_key(key)).count(), 1, "{key}");
    }
    assert_eq!(heap.type_of(&JsValue::Object(wrapped)).unwrap(), "function");
    assert_eq!(heap.get_prototype_of(wrapped).unwrap(), heap.get_prototype_of(source).unwrap());
}

// ===========================================================================
// 10. Middleware
// ===========================================================================

fn redacting(key: &'static str, seen: Rc<RefCell<Vec<Mock>>>) -> Middleware {
    Middleware::new(move |handler: ProxyHandler, mock: &Mock| {
        seen.borrow_mut().push(mock.clone());
        let inner = handler.get.clone();
        let get: GetTrap = Rc::new(
            move |heap: &mut ObjectHeap,
                  target: ObjectHandle,
                  k: &PropertyKey,
                  receiver: &JsValue|
                  -> Result<JsValue, ObjectError> {
                if *k == str_key(key) {
                    return Ok(JsValue::Str("redacted".to_string()));
                }
                match &inner {
                    Some(trap) => trap(heap, target, k, receiver),
                    None => heap.get_property_with_receiver(target, k, receiver),
                }
            },
        );
        ProxyHandler {
            get: Some(get),
            ..handler
        }
    })
}

#[test]
fn middleware_decorates_traps_and_sees_engine() {
    let mut heap = ObjectHeap::new();
    let inner = plain(&mut heap, &[("secret", int_val(1))]);
    let source = plain(
        &mut heap,
        &[("secret", int_val(1)), ("open", int_val(2)), ("inner", JsValue::Object(inner))],
    );
    let seen = Rc::new(RefCell::new(Vec::new()));
    let (wrapped, mock) = wrap(
        &mut heap,
        source,
        MockOptionsInput::default().with_middleware(redacting("secret", Rc::clone(&seen))),
    );

    assert_eq!(get(&mut heap, wrapped, "secret"), str_val("redacted"));
    assert_eq!(get(&mut heap, wrapped, "open"), int_val(2));
    assert!(mock.getter("secret").calls().is_empty());
    assert_eq!(seen.borrow()[0], mock);

    let nested = get_object(&mut heap, wrapped, "inner");
    assert_eq!(get(&mut heap, nested, "secret"), str_val("redacted"));
    assert_eq!(seen.borrow().len(), 2);
}

// ===========================================================================
// 11. Factory and configuration
// ===========================================================================

#[test]
fn factory_options_from_json_layer() {
    let mut heap = ObjectHeap::new();
    let inner = heap.alloc_plain();
    let source = plain(&mut heap, &[("inner", JsValue::Object(inner))]);
    let defaults = MockOptionsInput::from_json_str(r#"{"access_key": "spy"}"#).unwrap();
    let overrides =
        MockOptionsInput::from_json_str(r#"{"proxify_properties": false}"#).unwrap();
    let moxy = factory(defaults);

    let wrapped = moxy
        .moxy(&mut heap, Some(&JsValue::Object(source)), overrides)
        .unwrap();
    let handle = wrapped.as_object().unwrap();
    assert_eq!(get_object(&mut heap, handle, "inner"), inner);

    let mock = moxy.mock_of(&heap, &wrapped).unwrap().unwrap();
    assert_eq!(mock.options().access_key, str_key("spy"));
    assert!(!mock.options().proxify_properties);
}

#[test]
fn proxify_primitive_is_invalid_target() {
    let mut heap = ObjectHeap::new();
    let err = Mock::default().proxify(&mut heap, &str_val("nope")).unwrap_err();
    assert_eq!(err.to_string(), "cannot create proxy with a non-object as target (got string)");
}
