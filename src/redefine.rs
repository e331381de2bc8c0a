use fnv::{FnvHashMap, FnvHashSet};
use log::{debug, trace, warn};
use std::fmt::{self, Debug, Formatter};
use std::ptr;
use std::rc::{Rc};
use super::class::{build_slot_table, check_direct_slots, linearize};
use super::class::{ClassEntry, ClassId, ClassState, Supers};
use super::engine::{Mop};
use super::error::{MopResult};
use super::generic::{GenericId, MethodId};
use super::slot::{Owner, SlotDef, SlotInit};
use super::val::{Sym, ToSym};

/*

redefinition happens in two phases. start_class_redefinition() hands out a draft, which is a
plain copy of the class' direct definition; editing the draft touches nothing else. committing
the draft then:

	1. validates it and stages a new ClassState for the class and for every descendant whose
	   cpl or slot table would change. staging only reads committed state, so any failure here
	   leaves the Mop exactly as it was.
	2. swaps the staged states in. this phase can't fail and never calls user code: accessors
	   are re-owned, live instances are migrated, subclass edges are patched and the dispatch
	   caches of every affected generic are dropped.
	3. clears the redefinition flag, and only then notifies the invalidation listeners, which
	   are free to start another redefinition.

*/

/**
A pending redefinition of a class, obtained from
[`Mop::start_class_redefinition`](struct.Mop.html#method.start_class_redefinition).

The draft starts out as a copy of the class' current direct definition. Nothing is changed
until it's committed; dropping it without committing abandons the redefinition.
*/

pub struct ClassRedefinition<'m> {
	mop: &'m Mop,
	class: ClassId,
	name: Sym,
	direct_supers: Vec<ClassId>,
	direct_slots: Vec<SlotDef>,
	native_words: usize,
	finished: bool
}

impl<'m> ClassRedefinition<'m> {
	pub fn class(&self) -> ClassId {
		self.class
	}

	pub fn name(&self) -> &Sym {
		&self.name
	}

	pub fn direct_supers(&self) -> &[ClassId] {
		&self.direct_supers
	}

	pub fn direct_slots(&self) -> &[SlotDef] {
		&self.direct_slots
	}

	pub fn set_name<S: ToSym>(&mut self, name: S) -> &mut Self {
		self.name = name.to_sym();
		self
	}

	///Replaces the direct superclasses. An empty list means `<object>`.
	pub fn set_direct_supers(&mut self, supers: &[ClassId]) -> &mut Self {
		self.direct_supers = supers.to_vec();
		self
	}

	pub fn set_slots<I: IntoIterator<Item = SlotDef>>(&mut self, slot_defs: I) -> &mut Self {
		self.direct_slots = slot_defs.into_iter().collect();
		self
	}

	///Adds a direct slot, replacing any existing direct slot with the same name.
	pub fn add_slot(&mut self, slot_def: SlotDef) -> &mut Self {
		match self.direct_slots.iter().position(|s| s.name == slot_def.name) {
			Some(i) => self.direct_slots[i] = slot_def,
			None => self.direct_slots.push(slot_def)
		}

		self
	}

	///Removes a direct slot. Returns `false` if the draft has no direct slot with that name.
	pub fn remove_slot<S: ToSym>(&mut self, name: S) -> bool {
		let name = name.to_sym();
		let before = self.direct_slots.len();
		self.direct_slots.retain(|s| s.name != name);
		self.direct_slots.len() != before
	}

	pub fn set_native_words(&mut self, words: usize) -> &mut Self {
		self.native_words = words;
		self
	}

	///Equivalent to [`Mop::commit_class_redefinition`](struct.Mop.html#method.commit_class_redefinition).
	pub fn commit(self) -> MopResult<RedefinitionReport> {
		let mop = self.mop;
		mop.commit_class_redefinition(self)
	}
}

impl<'m> Drop for ClassRedefinition<'m> {
	fn drop(&mut self) {
		if !self.finished {
			warn!("redefinition of {} ({:?}) was abandoned without being committed",
			      self.name, self.class);

			if let Ok(entry) = self.mop.class_entry(self.class) {
				entry.redefining.set(false);
			}
		}
	}
}

impl<'m> Debug for ClassRedefinition<'m> {
	fn fmt(&self, f: &mut Formatter) -> fmt::Result {
		f.debug_struct("ClassRedefinition")
			.field("class", &self.class)
			.field("name", &self.name)
			.field("direct_supers", &self.direct_supers)
			.field("direct_slots", &self.direct_slots.iter().map(|s| &s.name).collect::<Vec<_>>())
			.field("native_words", &self.native_words)
			.finish()
	}
}

///A summary of a committed redefinition.
#[derive(Clone, Debug, Default)]
pub struct RedefinitionReport {
	///The redefined class, followed by each descendant whose layout or cpl changed.
	pub classes: Vec<ClassId>,

	///The number of live instances which were migrated to a new layout.
	pub instances_migrated: usize,

	///Methods specializing on any of `classes`.
	pub invalidated: Vec<MethodId>
}

struct Staged {
	class: ClassId,
	entry: Rc<ClassEntry>,
	old: Rc<ClassState>,
	new: Rc<ClassState>,
	inits: Vec<SlotInit>
}


//-------------------------------------------------------------------------------------------------
// redefinition operations
//-------------------------------------------------------------------------------------------------

impl Mop {
	/**
	Starts redefining a class.

	Fails with `RedefinitionNotAllowed` if the class is immutable, or with
	`RedefinitionInProgress` if a draft for the class is already outstanding.
	*/
	pub fn start_class_redefinition(&self, class: ClassId) -> MopResult<ClassRedefinition<'_>> {
		let entry = self.class_entry(class)?;
		let state = entry.state();

		ensure!(!entry.immutable, RedefinitionNotAllowed, "{} is immutable", state.name);
		ensure!(!entry.redefining.get(), RedefinitionInProgress,
		        "{} is already being redefined", state.name);

		entry.redefining.set(true);
		trace!("started redefinition of {} ({:?})", state.name, class);

		Ok(ClassRedefinition {
			mop: self,
			class,
			name: state.name.clone(),
			direct_supers: state.direct_supers.to_vec(),
			direct_slots: state.direct_slots.clone(),
			native_words: state.native_words,
			finished: false
		})
	}

	/**
	Commits a redefinition draft.

	The class and each affected descendant receive a new class precedence list and slot
	table; their `ClassId`s are unchanged. Live instances are migrated in place: slots which
	survive the redefinition keep their values, new slots receive their init-value (init-thunks
	are not run), and removed slots are dropped. Accessors whose slot didn't change remain
	valid; all others become stale.

	On failure, for example with `InconsistentHierarchy`, nothing is changed. Either way the
	class is no longer being redefined afterwards.
	*/
	pub fn commit_class_redefinition(
		&self,
		draft: ClassRedefinition<'_>
	) -> MopResult<RedefinitionReport> {
		let mut draft = draft;
		ensure!(ptr::eq(draft.mop, self), InvalidArgument,
		        "the redefinition of {} belongs to another Mop", draft.name);

		draft.finished = true;

		let entry = self.class_entry(draft.class)?;
		let result = self.stage_redefinition(&draft, &entry);
		entry.redefining.set(false);

		let staged = result?;
		let (report, invalidated) = self.swap_staged(&draft, staged)?;

		let listeners = self.listeners.borrow().clone();
		for (generic, method) in invalidated {
			for listener in &listeners {
				listener(self, generic, method);
			}
		}

		Ok(report)
	}

	fn stage_redefinition(
		&self,
		draft: &ClassRedefinition<'_>,
		entry: &Rc<ClassEntry>
	) -> MopResult<Vec<Staged>> {
		let class = draft.class;

		let mut supers = draft.direct_supers.clone();
		if supers.is_empty() {
			supers.push(self.builtins.object);
		}

		self.check_supers(&draft.name, &supers)?;
		check_direct_slots(&draft.name, &draft.direct_slots)?;

		let descendants = self.descendants(class)?;
		for &sup in &supers {
			ensure!(sup != class && !descendants.contains(&sup), InconsistentHierarchy,
			        "{} can't inherit from {:?}, which is itself or one of its subclasses",
			        draft.name, sup);
		}

		let mut staged_states: FnvHashMap<ClassId, Rc<ClassState>> = FnvHashMap::default();
		let mut staged = Vec::new();

		let old = entry.state();
		let (new, inits) = self.stage_state(class, draft.name.clone(), &supers,
		                                    draft.direct_slots.clone(), draft.native_words, &old,
		                                    &staged_states)?;

		staged_states.insert(class, Rc::clone(&new));
		staged.push(Staged { class, entry: Rc::clone(entry), old, new, inits });

		for descendant in descendants {
			let entry = self.class_entry(descendant)?;
			let old = entry.state();
			let (new, inits) = self.stage_state(descendant, old.name.clone(), &old.direct_supers,
			                                    old.direct_slots.clone(), old.native_words, &old,
			                                    &staged_states)?;

			let unchanged = new.cpl == old.cpl
				&& new.core_size == old.core_size
				&& new.slots.len() == old.slots.len()
				&& new.slots.iter().zip(old.slots.iter()).all(|(a, b)| Rc::ptr_eq(a, b))
				&& new.slots.iter().zip(inits.iter()).all(|(acc, init)| acc.init().same_as(init));

			if !unchanged {
				staged_states.insert(descendant, Rc::clone(&new));
				staged.push(Staged { class: descendant, entry, old, new, inits });
			}
		}

		Ok(staged)
	}

	//builds a class' next state against a mix of staged and committed ancestor states
	#[allow(clippy::too_many_arguments)]
	fn stage_state(
		&self,
		class: ClassId,
		name: Sym,
		supers: &[ClassId],
		direct_slots: Vec<SlotDef>,
		native_words: usize,
		old: &ClassState,
		staged: &FnvHashMap<ClassId, Rc<ClassState>>
	) -> MopResult<(Rc<ClassState>, Vec<SlotInit>)> {
		let state_of = |c: ClassId| match staged.get(&c) {
			Some(state) => Rc::clone(state),
			None => self.committed_state(c)
		};

		let cpl = linearize(class, supers, |c| state_of(c).cpl.clone())?;

		let epoch = self.next_epoch();
		let table = build_slot_table(class, epoch, &cpl, &direct_slots, native_words, state_of,
		                             Some(old));

		let state = ClassState {
			name,
			direct_supers: Supers::from_slice(supers),
			cpl,
			direct_slots,
			native_words,
			slots: table.slots,
			slot_names: table.slot_names,
			fixed_count: table.fixed_count,
			core_size: table.core_size,
			epoch
		};

		Ok((Rc::new(state), table.inits))
	}

	fn swap_staged(
		&self,
		draft: &ClassRedefinition<'_>,
		staged: Vec<Staged>
	) -> MopResult<(RedefinitionReport, Vec<(GenericId, MethodId)>)> {
		let mut report = RedefinitionReport::default();

		for Staged { class, entry, old, new, inits } in staged {
			let owner = Owner { class, epoch: new.epoch };
			for (accessor, init) in new.slots.iter().zip(inits) {
				accessor.set_owner(owner);
				accessor.set_init(init);
			}

			let instances = entry.live_instances();
			for obj in &instances {
				obj.migrate(&old, &new);
			}

			trace!("migrated {} instances of {} ({:?})", instances.len(), new.name, class);
			report.instances_migrated += instances.len();

			if class == draft.class {
				self.patch_edges(class, &old, &new)?;
			}

			*entry.state.borrow_mut() = new;
			report.classes.push(class);
		}

		let mut seen = FnvHashSet::default();
		let mut invalidated = Vec::new();
		let mut generics = FnvHashSet::default();
		for &class in &report.classes {
			for &method in self.class_entry(class)?.direct_methods.borrow().iter() {
				if !seen.insert(method) {
					continue
				}

				report.invalidated.push(method);
				if let Some(generic) = self.method_entry(method)?.generic.get() {
					invalidated.push((generic, method));
					generics.insert(generic);
				}
			}
		}

		for generic in generics {
			self.generic_entry(generic)?.cache.borrow_mut().clear();
			trace!("cleared the dispatch cache of {:?}", generic);
		}

		self.bump_hierarchy_epoch();

		debug!("redefined {} ({:?}): {} classes changed, {} instances migrated, \
		        {} methods invalidated", draft.name, draft.class, report.classes.len(),
		       report.instances_migrated, report.invalidated.len());

		Ok((report, invalidated))
	}

	//updates the subclass registry and the name table after the class itself is redefined
	fn patch_edges(&self, class: ClassId, old: &ClassState, new: &ClassState) -> MopResult<()> {
		for &sup in old.direct_supers.iter().filter(|s| !new.direct_supers.contains(s)) {
			self.remove_direct_subclass(sup, class)?;
		}

		for &sup in new.direct_supers.iter().filter(|s| !old.direct_supers.contains(s)) {
			self.add_direct_subclass(sup, class)?;
		}

		if old.name != new.name {
			let mut class_names = self.class_names.borrow_mut();
			if class_names.get(&old.name) == Some(&class) {
				class_names.remove(&old.name);
			}

			class_names.insert(new.name.clone(), class);
		}

		Ok(())
	}
}
