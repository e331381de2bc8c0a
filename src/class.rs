use fnv::{FnvHashMap, FnvHashSet};
use log::{debug};
use smallvec::{SmallVec};
use std::cell::{Cell, RefCell};
use std::fmt::{self, Debug, Formatter};
use std::rc::{Rc, Weak};
use super::engine::{Mop};
use super::error::{MopResult};
use super::generic::{MethodId};
use super::obj::{Obj, ObjStorage};
use super::slot::{Allocation, Owner, SlotAccessor, SlotDef, SlotInit, Storage};
use super::val::{Sym, ToSym, Val};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/*

a class is split into two parts. the ClassEntry is its identity: it lives in the Mop's arena
for as long as the Mop does, and it owns the mutable edge sets (direct subclasses, direct
methods and live instances) along with the redefinition flag. the ClassState is everything
which redefinition is allowed to change: it's immutable once built, and redefinition replaces
it wholesale by swapping the Rc stored in the entry.

anybody holding a ClassId (instances, methods, other classes) therefore never needs to be
patched when a class is redefined; they simply observe the new state on their next lookup.

*/

/**
A handle to a class.

Handles are stable: redefining a class preserves its `ClassId`.
*/

#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ClassId(pub(crate) u32);

impl ClassId {
	pub fn index(self) -> usize {
		self.0 as usize
	}
}

impl Debug for ClassId {
	fn fmt(&self, f: &mut Formatter) -> fmt::Result {
		write!(f, "#<class:{}>", self.0)
	}
}

pub(crate) type Cpl = SmallVec<[ClassId; 8]>;
pub(crate) type Supers = SmallVec<[ClassId; 4]>;

pub(crate) struct ClassState {
	pub(crate) name: Sym,
	pub(crate) direct_supers: Supers,
	pub(crate) cpl: Cpl,

	//the class' own slot declarations, kept so that subclasses and redefinitions can rebuild
	//their effective slot tables from scratch
	pub(crate) direct_slots: Vec<SlotDef>,
	pub(crate) native_words: usize,

	//the effective slot table, in layout order, with a name index into it
	pub(crate) slots: Vec<Rc<SlotAccessor>>,
	pub(crate) slot_names: FnvHashMap<Sym, usize>,

	//fixed-offset slots occupy words 0 .. fixed_count. native words follow them.
	pub(crate) fixed_count: usize,
	pub(crate) core_size: usize,

	//unique across the whole Mop; a fresh epoch is assigned every time a state is built
	pub(crate) epoch: u32
}

impl ClassState {
	pub(crate) fn accessor(&self, name: &Sym) -> Option<&Rc<SlotAccessor>> {
		self.slot_names.get(name).map(|&i| &self.slots[i])
	}
}

pub(crate) struct ClassEntry {
	pub(crate) state: RefCell<Rc<ClassState>>,
	pub(crate) immutable: bool,
	pub(crate) instantiable: bool,
	pub(crate) redefining: Cell<bool>,

	//non-owning back-references. kept in insertion order so that reflection is deterministic.
	pub(crate) subclasses: RefCell<Vec<ClassId>>,
	pub(crate) direct_methods: RefCell<Vec<MethodId>>,
	pub(crate) instances: RefCell<Vec<Weak<ObjStorage>>>
}

impl ClassEntry {
	pub(crate) fn state(&self) -> Rc<ClassState> {
		Rc::clone(&self.state.borrow())
	}

	pub(crate) fn register_instance(&self, obj: &Obj) {
		let mut instances = self.instances.borrow_mut();

		//prune dead entries whenever the vec would otherwise reallocate
		if instances.len() == instances.capacity() {
			instances.retain(|weak| weak.strong_count() > 0);
		}

		instances.push(obj.downgrade());
	}

	pub(crate) fn live_instances(&self) -> Vec<Obj> {
		let mut instances = self.instances.borrow_mut();
		instances.retain(|weak| weak.strong_count() > 0);
		instances.iter().filter_map(Obj::upgrade).collect()
	}
}


//-------------------------------------------------------------------------------------------------
// ClassDef
//-------------------------------------------------------------------------------------------------

/**
A description of a new class, passed to [`Mop::define_class`](struct.Mop.html#method.define_class).

```ignore
let point = mop.define_class(
	ClassDef::new("<point>")
		.slot(SlotDef::instance("x").init_keyword("x").init_value(0))
		.slot(SlotDef::instance("y").init_keyword("y").init_value(0))
)?;
```

A class with no explicit superclasses inherits from `<object>`.
*/

#[derive(Clone)]
pub struct ClassDef {
	pub(crate) name: Sym,
	pub(crate) supers: Vec<ClassId>,
	pub(crate) slots: Vec<SlotDef>,
	pub(crate) native_words: usize,
	pub(crate) immutable: bool
}

impl ClassDef {
	pub fn new<S: ToSym>(name: S) -> ClassDef {
		ClassDef {
			name: name.to_sym(),
			supers: Vec::new(),
			slots: Vec::new(),
			native_words: 0,
			immutable: false
		}
	}

	///Appends a direct superclass. Earlier superclasses take precedence over later ones.
	pub fn superclass(mut self, class: ClassId) -> ClassDef {
		self.supers.push(class);
		self
	}

	pub fn supers(mut self, classes: &[ClassId]) -> ClassDef {
		self.supers.extend_from_slice(classes);
		self
	}

	pub fn slot(mut self, slot_def: SlotDef) -> ClassDef {
		self.slots.push(slot_def);
		self
	}

	pub fn slots<I: IntoIterator<Item = SlotDef>>(mut self, slot_defs: I) -> ClassDef {
		self.slots.extend(slot_defs);
		self
	}

	/**
	Reserves extra words in each instance's core, after the fixed-offset slots, for use by
	native accessors.

	Subclasses reserve at least as many native words as any of their ancestors.
	*/
	pub fn native_words(mut self, words: usize) -> ClassDef {
		self.native_words = words;
		self
	}

	///Marks the class as immutable. Immutable classes reject redefinition.
	pub fn immutable(mut self, immutable: bool) -> ClassDef {
		self.immutable = immutable;
		self
	}
}


//-------------------------------------------------------------------------------------------------
// linearization
//-------------------------------------------------------------------------------------------------

/*
the C3 merge. we merge the singleton (class), the cpl of each direct superclass in order, and
the direct superclass list itself. at each step we take the first head, scanning the lists from
left to right, which doesn't appear in the tail of any list.

`cpl_of` must return the current cpl of any class other than `class` itself. the caller decides
what "current" means, which is how redefinition computes cpls against staged states.
*/

pub(crate) fn linearize<F>(class: ClassId, supers: &[ClassId], cpl_of: F) -> MopResult<Cpl>
where
	F: Fn(ClassId) -> Cpl
{
	let mut seqs: SmallVec<[Cpl; 6]> = SmallVec::new();
	seqs.push(Cpl::from_slice(&[class]));
	for &sup in supers {
		seqs.push(cpl_of(sup));
	}
	seqs.push(Cpl::from_slice(supers));

	//each seq is consumed from the front; heads[i] is the index of seqs[i]'s current head
	let mut heads: SmallVec<[usize; 6]> = SmallVec::from_elem(0, seqs.len());
	let mut result = Cpl::new();

	loop {
		let exhausted = seqs.iter().zip(heads.iter()).all(|(seq, &head)| head >= seq.len());
		if exhausted {
			break
		}

		let in_some_tail = |candidate: ClassId| {
			seqs.iter().zip(heads.iter()).any(|(seq, &head)| {
				head < seq.len() && seq[head + 1 ..].contains(&candidate)
			})
		};

		let mut picked = None;
		for (seq, &head) in seqs.iter().zip(heads.iter()) {
			if head < seq.len() && !in_some_tail(seq[head]) {
				picked = Some(seq[head]);
				break
			}
		}

		let next = match picked {
			Some(next) => next,
			None => bail!(InconsistentHierarchy, "no consistent precedence order exists for \
			               the superclasses of {:?}", class)
		};

		result.push(next);
		for (seq, head) in seqs.iter().zip(heads.iter_mut()) {
			if *head < seq.len() && seq[*head] == next {
				*head += 1;
			}
		}
	}

	//if the class already appears among its own ancestors, the merge can succeed without
	//putting it first
	ensure!(result.first() == Some(&class), InconsistentHierarchy,
	        "{:?} would be its own superclass", class);

	Ok(result)
}


//-------------------------------------------------------------------------------------------------
// slot tables
//-------------------------------------------------------------------------------------------------

pub(crate) struct SlotTable {
	pub(crate) slots: Vec<Rc<SlotAccessor>>,

	//the init options of each slot's winning declaration, parallel to `slots`. a reused
	//accessor still carries its previous options until the caller commits these.
	pub(crate) inits: Vec<SlotInit>,
	pub(crate) slot_names: FnvHashMap<Sym, usize>,
	pub(crate) fixed_count: usize,
	pub(crate) core_size: usize
}

/*
builds the effective slot table of `class` from the direct slots of every class in its cpl.

when two classes in the cpl declare the same slot name, the more specific declaration wins.
slots are laid out in reverse cpl order (most general class first), so that under single
inheritance a subclass' fixed-offset slots extend its superclass' layout.

if `previous` is given, any accessor whose name and storage are unchanged is reused rather
than rebuilt; the caller is responsible for updating its Owner and init options when it
commits.
*/

pub(crate) fn build_slot_table<F>(
	class: ClassId,
	epoch: u32,
	cpl: &[ClassId],
	own_slots: &[SlotDef],
	own_native_words: usize,
	state_of: F,
	previous: Option<&ClassState>
) -> SlotTable
where
	F: Fn(ClassId) -> Rc<ClassState>
{
	let ancestors: Vec<Rc<ClassState>> = cpl[1..].iter().map(|&c| state_of(c)).collect();

	let direct_slots_of = |i: usize| {
		if i == 0 {
			own_slots
		} else {
			&ancestors[i - 1].direct_slots[..]
		}
	};

	let mut winners: FnvHashMap<Sym, &SlotDef> = FnvHashMap::default();
	for i in 0 .. cpl.len() {
		for slot_def in direct_slots_of(i) {
			winners.entry(slot_def.name.clone()).or_insert(slot_def);
		}
	}

	let native_words = ancestors.iter()
		.map(|state| state.native_words)
		.fold(own_native_words, usize::max);

	let owner = Owner { class, epoch };
	let mut slots = Vec::with_capacity(winners.len());
	let mut inits = Vec::with_capacity(winners.len());
	let mut slot_names = FnvHashMap::default();
	let mut fixed_count = 0;

	for i in (0 .. cpl.len()).rev() {
		for slot_def in direct_slots_of(i) {
			if slot_names.contains_key(&slot_def.name) {
				continue
			}

			let winner = winners[&slot_def.name];
			let storage = match winner.allocation {
				Allocation::Instance => {
					fixed_count += 1;
					Storage::Fixed(fixed_count - 1)
				}
				Allocation::Native { getter, setter } => Storage::Native { getter, setter },
				Allocation::Virtual { ref getter, ref setter } => {
					Storage::Virtual { getter: getter.clone(), setter: setter.clone() }
				}
			};

			let reused = previous
				.and_then(|prev| prev.accessor(&winner.name))
				.filter(|acc| acc.matches(winner, &storage))
				.map(Rc::clone);

			let accessor = match reused {
				Some(accessor) => accessor,
				None => Rc::new(SlotAccessor::new(winner, storage, owner))
			};

			slot_names.insert(winner.name.clone(), slots.len());
			slots.push(accessor);
			inits.push(winner.init.clone());
		}
	}

	SlotTable {
		slots,
		inits,
		slot_names,
		fixed_count,
		core_size: fixed_count + native_words
	}
}

pub(crate) fn check_direct_slots(class_name: &Sym, slot_defs: &[SlotDef]) -> MopResult<()> {
	let mut seen = FnvHashSet::default();
	for slot_def in slot_defs {
		ensure!(seen.insert(&slot_def.name), InvalidArgument,
		        "slot '{}' is declared more than once in {}", slot_def.name, class_name);
	}

	Ok(())
}


//-------------------------------------------------------------------------------------------------
// class operations
//-------------------------------------------------------------------------------------------------

impl Mop {
	/**
	Defines a new class.

	Computes the class precedence list and the effective slot table, then registers the new
	class as a direct subclass of each of its superclasses. If no linearization exists, fails
	with `InconsistentHierarchy` without registering anything.

	Defining a class with the name of an existing class creates a new, unrelated class and
	rebinds the name; use [`start_class_redefinition`](#method.start_class_redefinition) to
	change an existing class in place.
	*/
	pub fn define_class(&self, def: ClassDef) -> MopResult<ClassId> {
		let mut def = def;
		if def.supers.is_empty() {
			def.supers.push(self.builtins.object);
		}

		self.define_class_impl(def, true)
	}

	pub(crate) fn define_class_impl(&self, def: ClassDef, instantiable: bool) -> MopResult<ClassId> {
		let ClassDef { name, supers, slots: direct_slots, native_words, immutable } = def;

		self.check_supers(&name, &supers)?;
		check_direct_slots(&name, &direct_slots)?;

		let id = ClassId(self.classes.borrow().len() as u32);
		let cpl = linearize(id, &supers, |c| self.committed_state(c).cpl.clone())?;

		let epoch = self.next_epoch();
		let table = build_slot_table(id, epoch, &cpl, &direct_slots, native_words,
		                             |c| self.committed_state(c), None);

		debug!("defined class {} ({:?}) with {} slots and core size {}",
		       name, id, table.slots.len(), table.core_size);

		let state = ClassState {
			name: name.clone(),
			direct_supers: Supers::from_slice(&supers),
			cpl,
			direct_slots,
			native_words,
			slots: table.slots,
			slot_names: table.slot_names,
			fixed_count: table.fixed_count,
			core_size: table.core_size,
			epoch
		};

		self.classes.borrow_mut().push(Rc::new(ClassEntry {
			state: RefCell::new(Rc::new(state)),
			immutable,
			instantiable,
			redefining: Cell::new(false),
			subclasses: RefCell::new(Vec::new()),
			direct_methods: RefCell::new(Vec::new()),
			instances: RefCell::new(Vec::new())
		}));

		for &sup in &supers {
			self.add_direct_subclass(sup, id)?;
		}

		self.class_names.borrow_mut().insert(name, id);
		Ok(id)
	}

	pub(crate) fn check_supers(&self, name: &Sym, supers: &[ClassId]) -> MopResult<()> {
		let mut seen = FnvHashSet::default();
		for &sup in supers {
			self.class_entry(sup)?;
			ensure!(seen.insert(sup), InvalidArgument,
			        "{:?} appears more than once among the superclasses of {}", sup, name);
		}

		Ok(())
	}

	/**
	Computes the class precedence list for a class from its current direct superclasses,
	without storing it.

	Fails with `InconsistentHierarchy` if no linearization exists.
	*/
	pub fn compute_cpl(&self, class: ClassId) -> MopResult<Vec<ClassId>> {
		let state = self.class_entry(class)?.state();
		let cpl = linearize(class, &state.direct_supers, |c| self.committed_state(c).cpl.clone())?;
		Ok(cpl.into_vec())
	}

	///Returns the class precedence list: the class itself first, `<top>` last.
	pub fn class_cpl(&self, class: ClassId) -> MopResult<Vec<ClassId>> {
		Ok(self.class_entry(class)?.state().cpl.to_vec())
	}

	pub fn class_name(&self, class: ClassId) -> MopResult<Sym> {
		Ok(self.class_entry(class)?.state().name.clone())
	}

	pub fn class_direct_supers(&self, class: ClassId) -> MopResult<Vec<ClassId>> {
		Ok(self.class_entry(class)?.state().direct_supers.to_vec())
	}

	pub fn class_direct_subclasses(&self, class: ClassId) -> MopResult<Vec<ClassId>> {
		Ok(self.class_entry(class)?.subclasses.borrow().clone())
	}

	///Returns every method which specializes on this class at any argument position.
	pub fn class_direct_methods(&self, class: ClassId) -> MopResult<Vec<MethodId>> {
		Ok(self.class_entry(class)?.direct_methods.borrow().clone())
	}

	///Returns the class' effective slot accessors, in layout order.
	pub fn class_slots(&self, class: ClassId) -> MopResult<Vec<Rc<SlotAccessor>>> {
		Ok(self.class_entry(class)?.state().slots.clone())
	}

	///Returns the number of words which each instance of this class requires.
	pub fn class_core_size(&self, class: ClassId) -> MopResult<usize> {
		Ok(self.class_entry(class)?.state().core_size)
	}

	pub fn is_immutable(&self, class: ClassId) -> MopResult<bool> {
		Ok(self.class_entry(class)?.immutable)
	}

	///Returns `true` while a redefinition of this class has been started but not committed.
	pub fn is_redefining(&self, class: ClassId) -> MopResult<bool> {
		Ok(self.class_entry(class)?.redefining.get())
	}

	pub fn find_class<S: ToSym>(&self, name: S) -> Option<ClassId> {
		self.class_names.borrow().get(&name.to_sym()).copied()
	}

	///Returns `true` if `sup` appears in the class precedence list of `sub`.
	pub fn is_subclass(&self, sub: ClassId, sup: ClassId) -> MopResult<bool> {
		self.class_entry(sup)?;
		Ok(self.class_entry(sub)?.state().cpl.contains(&sup))
	}

	///Returns `true` if the value's class is `class` or one of its subclasses.
	pub fn is_a(&self, val: &Val, class: ClassId) -> MopResult<bool> {
		self.is_subclass(self.class_of(val), class)
	}

	///Adds `sub` to the direct subclasses of `sup`. Adding an existing entry is a no-op.
	pub fn add_direct_subclass(&self, sup: ClassId, sub: ClassId) -> MopResult<()> {
		self.class_entry(sub)?;
		let entry = self.class_entry(sup)?;
		let mut subclasses = entry.subclasses.borrow_mut();
		if !subclasses.contains(&sub) {
			subclasses.push(sub);
		}

		Ok(())
	}

	///Removes `sub` from the direct subclasses of `sup`. Removing an absent entry is a no-op.
	pub fn remove_direct_subclass(&self, sup: ClassId, sub: ClassId) -> MopResult<()> {
		let entry = self.class_entry(sup)?;
		entry.subclasses.borrow_mut().retain(|&c| c != sub);
		Ok(())
	}

	///Records that `method` specializes on `class`. Adding an existing entry is a no-op.
	pub fn add_direct_method(&self, class: ClassId, method: MethodId) -> MopResult<()> {
		self.method_entry(method)?;
		let entry = self.class_entry(class)?;
		let mut direct_methods = entry.direct_methods.borrow_mut();
		if !direct_methods.contains(&method) {
			direct_methods.push(method);
		}

		Ok(())
	}

	///Removes `method` from the methods specializing on `class`. Absent entries are ignored.
	pub fn remove_direct_method(&self, class: ClassId, method: MethodId) -> MopResult<()> {
		let entry = self.class_entry(class)?;
		entry.direct_methods.borrow_mut().retain(|&m| m != method);
		Ok(())
	}

	//every transitive subclass of `class`, excluding `class`, ordered so that each class
	//follows all of its superclasses which are also in the list
	pub(crate) fn descendants(&self, class: ClassId) -> MopResult<Vec<ClassId>> {
		let mut found = FnvHashSet::default();
		let mut stack = vec![class];
		while let Some(c) = stack.pop() {
			for &sub in self.class_entry(c)?.subclasses.borrow().iter() {
				if found.insert(sub) {
					stack.push(sub);
				}
			}
		}

		//kahn's algorithm, restricted to the descendant set. `class` itself counts as placed.
		let mut placed = FnvHashSet::default();
		placed.insert(class);

		let mut pending: Vec<ClassId> = found.into_iter().collect();
		pending.sort();

		let mut ordered = Vec::with_capacity(pending.len());
		while !pending.is_empty() {
			let before = pending.len();
			let mut i = 0;
			while i < pending.len() {
				let c = pending[i];
				let state = self.class_entry(c)?.state();
				let ready = state.direct_supers.iter().all(|sup| {
					placed.contains(sup) || !self.is_descendant_of(*sup, class)
				});

				if ready {
					placed.insert(c);
					ordered.push(c);
					pending.remove(i);
				} else {
					i += 1;
				}
			}

			ensure!(pending.len() < before, InconsistentHierarchy,
			        "the subclass graph of {:?} contains a cycle", class);
		}

		Ok(ordered)
	}

	fn is_descendant_of(&self, c: ClassId, ancestor: ClassId) -> bool {
		c != ancestor && self.committed_state(c).cpl.contains(&ancestor)
	}
}


//-------------------------------------------------------------------------------------------------
// tests
//-------------------------------------------------------------------------------------------------
