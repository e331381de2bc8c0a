use std::cell::{Cell, RefCell};
use std::fmt::{self, Debug, Formatter};
use std::rc::{Rc};
use super::class::{ClassId};
use super::engine::{Mop};
use super::error::{ErrorKind, MopResult};
use super::obj::{Obj};
use super::val::{Proc, Sym, ToSym, Val};

///A getter implemented in host code.
pub type NativeGetter = fn(&Mop, &Obj) -> MopResult<Val>;

///A setter implemented in host code.
pub type NativeSetter = fn(&Mop, &Obj, Val) -> MopResult<()>;


//-------------------------------------------------------------------------------------------------
// SlotDef
//-------------------------------------------------------------------------------------------------

///How a slot declaration asks for its value to be stored.
#[derive(Clone)]
pub enum Allocation {
	///A word in the instance's core, assigned a fixed offset when the slot table is built.
	Instance,

	///Computed by host code.
	Native { getter: NativeGetter, setter: Option<NativeSetter> },

	///Computed by user-level procedures. The getter receives `(obj)`, the setter `(obj val)`.
	Virtual { getter: Proc, setter: Option<Proc> }
}

/**
A direct slot declaration, as written in a class definition.

```ignore
SlotDef::instance("count").init_keyword("count").init_value(0)
```
*/

#[derive(Clone)]
pub struct SlotDef {
	pub(crate) name: Sym,
	pub(crate) allocation: Allocation,
	pub(crate) init: SlotInit
}

//construction-time options. these can change without invalidating a slot's accessor.
#[derive(Clone)]
pub(crate) struct SlotInit {
	pub(crate) value: Option<Val>,
	pub(crate) thunk: Option<Proc>,
	pub(crate) keyword: Option<Sym>,
	pub(crate) initializable: bool
}

impl SlotInit {
	pub(crate) fn same_as(&self, other: &SlotInit) -> bool {
		let same_thunk = match (&self.thunk, &other.thunk) {
			(Some(t0), Some(t1)) => Proc::ptr_eq(t0, t1),
			(None, None) => true,
			_ => false
		};

		same_thunk
			&& self.value == other.value
			&& self.keyword == other.keyword
			&& self.initializable == other.initializable
	}
}

impl SlotDef {
	fn with_allocation<S: ToSym>(name: S, allocation: Allocation) -> SlotDef {
		SlotDef {
			name: name.to_sym(),
			allocation,
			init: SlotInit {
				value: None,
				thunk: None,
				keyword: None,
				initializable: true
			}
		}
	}

	///A slot stored at a fixed offset in each instance.
	pub fn instance<S: ToSym>(name: S) -> SlotDef {
		SlotDef::with_allocation(name, Allocation::Instance)
	}

	///A slot computed by host code. This is how static slot tables for native classes are written.
	pub fn native<S: ToSym>(name: S, getter: NativeGetter, setter: Option<NativeSetter>) -> SlotDef {
		SlotDef::with_allocation(name, Allocation::Native { getter, setter })
	}

	///A slot computed by user-level procedures.
	pub fn virtual_slot<S: ToSym>(name: S, getter: Proc, setter: Option<Proc>) -> SlotDef {
		SlotDef::with_allocation(name, Allocation::Virtual { getter, setter })
	}

	pub fn init_value<V: Into<Val>>(mut self, value: V) -> SlotDef {
		self.init.value = Some(value.into());
		self
	}

	///A procedure of no arguments, invoked at construction time when no explicit value or
	///init-value is available.
	pub fn init_thunk(mut self, thunk: Proc) -> SlotDef {
		self.init.thunk = Some(thunk);
		self
	}

	pub fn init_keyword<S: ToSym>(mut self, keyword: S) -> SlotDef {
		self.init.keyword = Some(keyword.to_sym());
		self
	}

	///Slots which aren't initializable ignore their init-keyword at construction time. Their
	///init-value and init-thunk still apply.
	pub fn initializable(mut self, initializable: bool) -> SlotDef {
		self.init.initializable = initializable;
		self
	}

	pub fn name(&self) -> &Sym {
		&self.name
	}
}


//-------------------------------------------------------------------------------------------------
// SlotAccessor
//-------------------------------------------------------------------------------------------------

///A resolved slot storage strategy. Exactly one is active per accessor.
#[derive(Clone)]
pub enum Storage {
	Native { getter: NativeGetter, setter: Option<NativeSetter> },
	Fixed(usize),
	Virtual { getter: Proc, setter: Option<Proc> }
}

impl Storage {
	fn same_as(&self, other: &Storage) -> bool {
		match (self, other) {
			(Storage::Fixed(a), Storage::Fixed(b)) => a == b,
			(Storage::Native { getter: g0, setter: s0 }, Storage::Native { getter: g1, setter: s1 }) => {
				*g0 as usize == *g1 as usize && s0.map(|s| s as usize) == s1.map(|s| s as usize)
			}
			(Storage::Virtual { getter: g0, setter: s0 }, Storage::Virtual { getter: g1, setter: s1 }) => {
				Proc::ptr_eq(g0, g1) && match (s0, s1) {
					(Some(s0), Some(s1)) => Proc::ptr_eq(s0, s1),
					(None, None) => true,
					_ => false
				}
			}
			_ => false
		}
	}
}

//which class layout an accessor was built for. the epoch distinguishes successive states of
//the same class.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub(crate) struct Owner {
	pub(crate) class: ClassId,
	pub(crate) epoch: u32
}

/**
One named slot's access strategy, shared by every instance of a class.

Accessors are only valid for the class layout they were resolved from. Redefining the owning
class either carries an accessor over (when the slot's name and storage didn't change, even if
its init options did) or replaces it, in which case using the old accessor fails with
`StaleAccessor` and the caller should re-resolve it.

A carried-over accessor takes on the redefined slot's init options at commit time, so its
[`init_value`](#method.init_value) and [`init_keyword`](#method.init_keyword) always describe
the current definition. Its name and storage never change.
*/

pub struct SlotAccessor {
	owner: Cell<Owner>,
	name: Sym,
	storage: Storage,
	init: RefCell<SlotInit>
}

impl SlotAccessor {
	pub(crate) fn new(slot_def: &SlotDef, storage: Storage, owner: Owner) -> SlotAccessor {
		SlotAccessor {
			owner: Cell::new(owner),
			name: slot_def.name.clone(),
			storage,
			init: RefCell::new(slot_def.init.clone())
		}
	}

	//true if this accessor can be carried over to a layout built from the given declaration
	pub(crate) fn matches(&self, slot_def: &SlotDef, storage: &Storage) -> bool {
		self.name == slot_def.name && self.storage.same_as(storage)
	}

	pub(crate) fn init(&self) -> SlotInit {
		self.init.borrow().clone()
	}

	pub(crate) fn set_init(&self, init: SlotInit) {
		*self.init.borrow_mut() = init;
	}

	pub(crate) fn owner(&self) -> Owner {
		self.owner.get()
	}

	pub(crate) fn set_owner(&self, owner: Owner) {
		self.owner.set(owner)
	}

	pub fn name(&self) -> &Sym {
		&self.name
	}

	///The class this accessor was resolved from.
	pub fn class(&self) -> ClassId {
		self.owner.get().class
	}

	pub fn storage(&self) -> &Storage {
		&self.storage
	}

	///For fixed-offset slots, the index of the slot's word in the instance core.
	pub fn slot_number(&self) -> Option<usize> {
		match self.storage {
			Storage::Fixed(i) => Some(i),
			_ => None
		}
	}

	pub fn init_value(&self) -> Option<Val> {
		self.init.borrow().value.clone()
	}

	pub fn init_keyword(&self) -> Option<Sym> {
		self.init.borrow().keyword.clone()
	}

	pub fn is_initializable(&self) -> bool {
		self.init.borrow().initializable
	}

	pub fn is_settable(&self) -> bool {
		match self.storage {
			Storage::Fixed(_) => true,
			Storage::Native { setter, .. } => setter.is_some(),
			Storage::Virtual { ref setter, .. } => setter.is_some()
		}
	}
}

impl Debug for SlotAccessor {
	fn fmt(&self, f: &mut Formatter) -> fmt::Result {
		let kind = match self.storage {
			Storage::Native { .. } => "native".to_string(),
			Storage::Fixed(i) => format!("instance:{}", i),
			Storage::Virtual { .. } => "virtual".to_string()
		};

		write!(f, "#<slot-accessor {:?}.{} {}>", self.owner.get().class, self.name, kind)
	}
}


//-------------------------------------------------------------------------------------------------
// slot access
//-------------------------------------------------------------------------------------------------

impl Mop {
	/**
	Looks up the accessor for a named slot in the instance's current class.

	Fails with `NoSuchSlot` if the class has no such slot.
	*/
	pub fn resolve_accessor<S: ToSym>(&self, obj: &Obj, name: S) -> MopResult<Rc<SlotAccessor>> {
		let name = name.to_sym();
		let state = self.class_entry(obj.class())?.state();
		match state.accessor(&name) {
			Some(accessor) => Ok(Rc::clone(accessor)),
			None => bail!(NoSuchSlot, "{} has no slot named '{}'", state.name, name)
		}
	}

	fn check_accessor(&self, obj: &Obj, accessor: &SlotAccessor) -> MopResult<()> {
		let owner = accessor.owner();
		ensure!(owner.class == obj.class() && owner.epoch == obj.epoch(), StaleAccessor,
		        "the accessor for slot '{}' was resolved from a different class layout; \
		         it must be resolved again", accessor.name);
		Ok(())
	}

	/**
	Reads a slot through an accessor.

	Fixed-offset slots which have never been written fail with `UnboundSlot`. Native slots
	call their host getter; virtual slots call their getter procedure with the instance.
	*/
	pub fn slot_ref_using_accessor(&self, obj: &Obj, accessor: &SlotAccessor) -> MopResult<Val> {
		self.check_accessor(obj, accessor)?;

		match accessor.storage {
			Storage::Native { getter, .. } => getter(self, obj),
			Storage::Fixed(i) => {
				match obj.word(i)? {
					Some(val) => Ok(val),
					None => bail!(UnboundSlot, "slot '{}' of {} is unbound", accessor.name,
					              self.class_name(obj.class())?)
				}
			}
			Storage::Virtual { ref getter, .. } => getter.call(self, &[Val::Obj(obj.clone())])
		}
	}

	/**
	Writes a slot through an accessor.

	Slots without a setter fail with `Unsettable`.
	*/
	pub fn slot_set_using_accessor(
		&self,
		obj: &Obj,
		accessor: &SlotAccessor,
		val: Val
	) -> MopResult<()> {
		self.check_accessor(obj, accessor)?;

		match accessor.storage {
			Storage::Native { setter: Some(setter), .. } => setter(self, obj, val),
			Storage::Fixed(i) => obj.set_word(i, Some(val)),
			Storage::Virtual { setter: Some(ref setter), .. } => {
				setter.call(self, &[Val::Obj(obj.clone()), val]).map(|_| ())
			}
			_ => bail!(Unsettable, "slot '{}' of {} is read-only", accessor.name,
			           self.class_name(obj.class())?)
		}
	}

	/**
	Returns `true` if the slot has a value.

	For native and virtual slots, this calls the getter: the slot is unbound only if the
	getter fails with `UnboundSlot`. Any other error is propagated.
	*/
	pub fn slot_bound_using_accessor(&self, obj: &Obj, accessor: &SlotAccessor) -> MopResult<bool> {
		self.check_accessor(obj, accessor)?;

		match accessor.storage {
			Storage::Fixed(i) => Ok(obj.word(i)?.is_some()),
			_ => {
				match self.slot_ref_using_accessor(obj, accessor) {
					Ok(_) => Ok(true),
					Err(ref err) if err.is(ErrorKind::UnboundSlot) => Ok(false),
					Err(err) => Err(err)
				}
			}
		}
	}

	pub fn slot_ref<S: ToSym>(&self, obj: &Obj, name: S) -> MopResult<Val> {
		let accessor = self.resolve_accessor(obj, name)?;
		self.slot_ref_using_accessor(obj, &accessor)
	}

	pub fn slot_set<S: ToSym, V: Into<Val>>(&self, obj: &Obj, name: S, val: V) -> MopResult<()> {
		let accessor = self.resolve_accessor(obj, name)?;
		self.slot_set_using_accessor(obj, &accessor, val.into())
	}

	pub fn slot_bound<S: ToSym>(&self, obj: &Obj, name: S) -> MopResult<bool> {
		let accessor = self.resolve_accessor(obj, name)?;
		self.slot_bound_using_accessor(obj, &accessor)
	}

	/**
	Reads a word of the instance core directly, including native words past the fixed-offset
	slots. Fails with `UnboundSlot` if the word is unbound.
	*/
	pub fn instance_slot_ref(&self, obj: &Obj, index: usize) -> MopResult<Val> {
		match obj.word(index)? {
			Some(val) => Ok(val),
			None => bail!(UnboundSlot, "word {} of {:?} is unbound", index, obj)
		}
	}

	pub fn instance_slot_set<V: Into<Val>>(&self, obj: &Obj, index: usize, val: V) -> MopResult<()> {
		obj.set_word(index, Some(val.into()))
	}

	/*
	construction-time initialization of a single slot. the value comes from, in order: the
	slot's init-keyword among `initargs` (initializable slots only), the init-value, or the
	init-thunk. with none of those, the slot is left alone.

	the thunk and any virtual or native setter may re-enter the Mop and even redefine the
	class, so the accessor is re-resolved if it's gone stale in the meantime.
	*/
	pub(crate) fn initialize_slot(
		&self,
		obj: &Obj,
		accessor: &Rc<SlotAccessor>,
		initargs: &[(Sym, Val)]
	) -> MopResult<()> {
		let init = accessor.init();
		let explicit = match (init.initializable, &init.keyword) {
			(true, Some(keyword)) => {
				initargs.iter().find(|(key, _)| key == keyword).map(|(_, val)| val.clone())
			}
			_ => None
		};

		let is_explicit = explicit.is_some();
		let value = match explicit {
			Some(val) => val,
			None => {
				match (init.value, init.thunk) {
					(Some(val), _) => val,
					(None, Some(thunk)) => thunk.call(self, &[])?,
					(None, None) => return Ok(())
				}
			}
		};

		let accessor = if self.check_accessor(obj, accessor).is_ok() {
			Rc::clone(accessor)
		} else {
			match self.resolve_accessor(obj, accessor.name.clone()) {
				Ok(fresh) => fresh,
				Err(ref err) if err.is(ErrorKind::NoSuchSlot) => return Ok(()),
				Err(err) => return Err(err)
			}
		};

		//defaults are quietly skipped for read-only slots; an explicit value is an error
		if accessor.is_settable() || is_explicit {
			self.slot_set_using_accessor(obj, &accessor, value)
		} else {
			Ok(())
		}
	}
}
