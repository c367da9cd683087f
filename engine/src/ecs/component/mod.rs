//! Component type descriptors and lifecycle hooks.
//!
//! Components are type-erased at this layer: a column only knows the
//! element layout and a table of function pointers. [`TypeInfo`] bundles
//! both for one data-carrying id. Ids without a `TypeInfo` are tags and
//! get no column.

use std::alloc::Layout;
use std::{mem, ptr};

use crate::ecs::entity::Entity;
use crate::ecs::id::Id;

mod registry;

pub use registry::Registry;

/// Constructor/destructor hook over a run of elements.
pub type Xtor = unsafe fn(ptr: *mut u8, count: usize, ti: &TypeInfo);

/// Move-style hook: relocate `count` elements from `src` to `dst`.
/// After the call the source run is moved-from and must not be destructed.
pub type MoveFn = unsafe fn(dst: *mut u8, src: *mut u8, count: usize, ti: &TypeInfo);

/// Copy-style hook: clone `count` elements from `src` into `dst`.
pub type CopyFn = unsafe fn(dst: *mut u8, src: *const u8, count: usize, ti: &TypeInfo);

/// Notification hook invoked on add/remove boundaries.
pub type IterHook = fn(ctx: &HookContext);

/// Context handed to [`IterHook`] callbacks.
pub struct HookContext<'a> {
    /// The entities covered by this notification.
    pub entities: &'a [Entity],
    /// Pointer to the first affected element.
    pub ptr: *mut u8,
    /// First affected row.
    pub row: usize,
    /// Number of affected rows.
    pub count: usize,
    /// The id the column stores.
    pub id: Id,
}

/// The lifecycle hook table for one component. Every hook is optional;
/// absent hooks fall back to plain byte copies or no-ops.
#[derive(Default, Clone, Copy)]
pub struct Hooks {
    pub ctor: Option<Xtor>,
    pub dtor: Option<Xtor>,
    pub copy: Option<CopyFn>,
    pub move_: Option<MoveFn>,
    pub copy_ctor: Option<CopyFn>,
    pub move_ctor: Option<MoveFn>,
    /// Construct into dst by moving from src, destructing src. Used when a
    /// column buffer relocates.
    pub ctor_move_dtor: Option<MoveFn>,
    /// Move into an existing dst, destructing src.
    pub move_dtor: Option<MoveFn>,
    pub on_add: Option<IterHook>,
    pub on_remove: Option<IterHook>,
}

impl Hooks {
    /// Full lifecycle hooks for a Rust type: default-construct, drop,
    /// bitwise move. The move hooks rely on Rust moves being bitwise: once
    /// moved, the source slot is abandoned without a drop.
    pub fn of<T: Default>() -> Self {
        Self {
            ctor: Some(ctor_impl::<T>),
            dtor: if mem::needs_drop::<T>() {
                Some(dtor_impl::<T>)
            } else {
                None
            },
            copy: None,
            move_: Some(move_impl::<T>),
            copy_ctor: None,
            move_ctor: Some(move_impl::<T>),
            ctor_move_dtor: Some(move_impl::<T>),
            move_dtor: Some(move_impl::<T>),
            on_add: None,
            on_remove: None,
        }
    }

    /// Lifecycle hooks for a cloneable type: [`Hooks::of`] plus copy hooks.
    pub fn cloneable<T: Default + Clone>() -> Self {
        Self {
            copy: Some(copy_impl::<T>),
            copy_ctor: Some(copy_impl::<T>),
            ..Self::of::<T>()
        }
    }
}

unsafe fn ctor_impl<T: Default>(ptr: *mut u8, count: usize, _ti: &TypeInfo) {
    let ptr = ptr as *mut T;
    for i in 0..count {
        unsafe { ptr.add(i).write(T::default()) };
    }
}

unsafe fn dtor_impl<T>(ptr: *mut u8, count: usize, _ti: &TypeInfo) {
    let ptr = ptr as *mut T;
    for i in 0..count {
        unsafe { ptr::drop_in_place(ptr.add(i)) };
    }
}

unsafe fn move_impl<T>(dst: *mut u8, src: *mut u8, count: usize, _ti: &TypeInfo) {
    unsafe { ptr::copy_nonoverlapping(src as *const T, dst as *mut T, count) };
}

unsafe fn copy_impl<T: Clone>(dst: *mut u8, src: *const u8, count: usize, _ti: &TypeInfo) {
    let dst = dst as *mut T;
    let src = src as *const T;
    for i in 0..count {
        unsafe { dst.add(i).write((*src.add(i)).clone()) };
    }
}

/// Information about a registered component: its id, element layout and
/// lifecycle hooks.
#[derive(Clone, Copy)]
pub struct TypeInfo {
    id: Id,
    layout: Layout,
    pub hooks: Hooks,
}

impl TypeInfo {
    /// Construct a descriptor from raw parts.
    ///
    /// # Panics
    /// Panics if the layout is zero-sized. Dataless ids are tags and must
    /// not carry a `TypeInfo`.
    pub fn new(id: Id, layout: Layout, hooks: Hooks) -> Self {
        assert!(
            layout.size() > 0,
            "component {} has no size; register it as a tag",
            id
        );
        Self { id, layout, hooks }
    }

    /// Descriptor for a Rust type with full lifecycle hooks.
    pub fn of<T: Default>(id: Id) -> Self {
        Self::new(id, Layout::new::<T>(), Hooks::of::<T>())
    }

    /// Descriptor for plain-bytes data: no hooks at all.
    pub fn trivial<T>(id: Id) -> Self {
        Self::new(id, Layout::new::<T>(), Hooks::default())
    }

    /// The component id this descriptor belongs to.
    #[inline]
    pub fn id(&self) -> Id {
        self.id
    }

    /// The element layout.
    #[inline]
    pub fn layout(&self) -> Layout {
        self.layout
    }

    /// The element size in bytes.
    #[inline]
    pub fn size(&self) -> usize {
        self.layout.size()
    }
}

impl std::fmt::Debug for TypeInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypeInfo")
            .field("id", &self.id)
            .field("size", &self.layout.size())
            .field("align", &self.layout.align())
            .finish()
    }
}
