use log::{trace};
use std::cell::{Cell, RefCell};
use std::fmt::{self, Debug, Formatter};
use std::rc::{Rc, Weak};
use super::class::{ClassId, ClassState};
use super::engine::{Mop};
use super::error::{MopResult};
use super::slot::{Storage};
use super::val::{Sym, ToSym, Val};

/**
An instance of a class.

`Obj` is a shared handle: cloning it doesn't copy the instance. When the instance's class is
redefined, its storage is laid out again in place; its identity and its `ClassId` never change.
*/

#[derive(Clone)]
pub struct Obj(Rc<ObjStorage>);

pub(crate) struct ObjStorage {
	class: ClassId,

	//the epoch of the class state which `words` is currently laid out for
	epoch: Cell<u32>,

	//one word per fixed-offset slot, followed by any native words. None is the unbound marker.
	words: RefCell<Vec<Option<Val>>>
}

impl Obj {
	fn new(class: ClassId, epoch: u32, core_size: usize) -> Obj {
		Obj(Rc::new(ObjStorage {
			class,
			epoch: Cell::new(epoch),
			words: RefCell::new(vec![None; core_size])
		}))
	}

	pub fn class(&self) -> ClassId {
		self.0.class
	}

	///The number of words currently allocated for this instance.
	pub fn core_size(&self) -> usize {
		self.0.words.borrow().len()
	}

	pub fn ptr_eq(obj0: &Obj, obj1: &Obj) -> bool {
		Rc::ptr_eq(&obj0.0, &obj1.0)
	}

	pub(crate) fn epoch(&self) -> u32 {
		self.0.epoch.get()
	}

	pub(crate) fn downgrade(&self) -> Weak<ObjStorage> {
		Rc::downgrade(&self.0)
	}

	pub(crate) fn upgrade(weak: &Weak<ObjStorage>) -> Option<Obj> {
		weak.upgrade().map(Obj)
	}

	pub(crate) fn word(&self, index: usize) -> MopResult<Option<Val>> {
		let words = self.0.words.borrow();
		ensure!(index < words.len(), InvalidArgument,
		        "word index {} is out of range for an instance of size {}", index, words.len());
		Ok(words[index].clone())
	}

	pub(crate) fn set_word(&self, index: usize, val: Option<Val>) -> MopResult<()> {
		let mut words = self.0.words.borrow_mut();
		ensure!(index < words.len(), InvalidArgument,
		        "word index {} is out of range for an instance of size {}", index, words.len());
		words[index] = val;
		Ok(())
	}

	/*
	re-lays out this instance's words for a new state of its class. fixed-offset slots are
	matched by name, since offsets may have moved. slots which are new to this layout take
	their static init-value, if any; init-thunks are never run here, because migration
	happens during a commit and mustn't call back into user code. native words are carried
	over by position, and any extra words the instance was allocated with are kept.
	*/
	pub(crate) fn migrate(&self, old: &ClassState, new: &ClassState) {
		let mut words = self.0.words.borrow_mut();

		let mut migrated: Vec<Option<Val>> = vec![None; new.fixed_count];
		for accessor in &new.slots {
			let new_index = match accessor.storage() {
				Storage::Fixed(i) => *i,
				_ => continue
			};

			let old_index = old.accessor(accessor.name()).and_then(|acc| acc.slot_number());
			migrated[new_index] = match old_index {
				Some(old_index) if old_index < words.len() => words[old_index].take(),
				_ => accessor.init_value()
			};
		}

		let tail_start = old.fixed_count.min(words.len());
		let tail_len = (words.len() - tail_start).max(new.core_size - new.fixed_count);
		migrated.extend(words.drain(tail_start ..));
		migrated.resize(new.fixed_count + tail_len, None);

		*words = migrated;
		self.0.epoch.set(new.epoch);
	}
}

impl Debug for Obj {
	fn fmt(&self, f: &mut Formatter) -> fmt::Result {
		write!(f, "#<obj {:?} at {:p}>", self.class(), Rc::as_ptr(&self.0))
	}
}


//-------------------------------------------------------------------------------------------------
// instance lifecycle
//-------------------------------------------------------------------------------------------------

impl Mop {
	/**
	Allocates an instance of `class` with every word unbound.

	`core_size` must be at least the class' core size; a larger value reserves extra words
	after the class' own layout, which native accessors can reach through
	[`instance_slot_ref`](#method.instance_slot_ref).
	*/
	pub fn allocate_instance(&self, class: ClassId, core_size: usize) -> MopResult<Obj> {
		let entry = self.class_entry(class)?;
		let state = entry.state();

		ensure!(entry.instantiable, InvalidArgument, "{} can't be instantiated", state.name);
		ensure!(core_size >= state.core_size, InvalidArgument,
		        "core size {} is smaller than the core size {} of {}",
		        core_size, state.core_size, state.name);

		let obj = Obj::new(class, state.epoch, core_size);
		entry.register_instance(&obj);

		trace!("allocated {:?} ({} words)", obj, core_size);
		Ok(obj)
	}

	/**
	Allocates and initializes an instance.

	Each slot, in layout order, is initialized from its init-keyword in `initargs`, its
	init-value, or its init-thunk, in that order of preference; otherwise it's left unbound.
	Keywords which no initializable slot accepts are ignored.
	*/
	pub fn make_instance(&self, class: ClassId, initargs: &[(&str, Val)]) -> MopResult<Obj> {
		let initargs: Vec<(Sym, Val)> = initargs.iter()
			.map(|(key, val)| (key.to_sym(), val.clone()))
			.collect();

		let state = self.class_entry(class)?.state();
		let obj = self.allocate_instance(class, state.core_size)?;

		for accessor in &state.slots {
			self.initialize_slot(&obj, accessor, &initargs)?;
		}

		Ok(obj)
	}
}
