use fnv::{FnvHashMap};
use std::cell::{Cell, RefCell};
use std::fmt::{self, Debug, Formatter};
use std::rc::{Rc};
use super::class::{ClassDef, ClassEntry, ClassId, ClassState};
use super::error::{MopResult};
use super::generic::{GenericEntry, GenericId, MethodEntry, MethodId};
use super::val::{Sym, Val};

/*

the Mop owns every metaobject. classes, generic functions and methods each live in an
append-only arena of Rcs, addressed by a u32 handle; nothing is ever removed from an arena, so
a handle stays valid for the Mop's whole lifetime.

every public operation takes &self. callbacks (virtual slot procedures, init-thunks, method
bodies and invalidation listeners) receive the same &Mop and may re-enter it freely, so no
RefCell is ever left borrowed while user code runs. arena lookups clone the Rc out of the
arena before returning it.

*/

pub(crate) type InvalidationFn = dyn Fn(&Mop, GenericId, MethodId);

pub(crate) struct MopConfig {
	pub(crate) dispatch_cache: bool,
	pub(crate) freeze_builtins: bool
}

/**
The classes which every [`Mop`](struct.Mop.html) defines at construction time.

```text
<top>
├── <object>
│   └── <class>
├── <boolean>
├── <null>
├── <number>
│   └── <real>
│       └── <integer>
├── <string>
├── <symbol>
└── <procedure>
```

Only `<object>` can be instantiated, and it's the default superclass of user-defined classes.
*/

#[derive(Copy, Clone, Debug)]
pub struct Builtins {
	pub top: ClassId,
	pub object: ClassId,
	pub class: ClassId,
	pub boolean: ClassId,
	pub null: ClassId,
	pub number: ClassId,
	pub real: ClassId,
	pub integer: ClassId,
	pub string: ClassId,
	pub symbol: ClassId,
	pub procedure: ClassId
}


//-------------------------------------------------------------------------------------------------
// MopBuilder
//-------------------------------------------------------------------------------------------------

/**
Configures and constructs a [`Mop`](struct.Mop.html).

```ignore
let mop = MopBuilder::new()
	.dispatch_cache(false)
	.build();
```

`Mop::new()` is equivalent to `MopBuilder::new().build()`.
*/

pub struct MopBuilder {
	dispatch_cache: bool,
	freeze_builtins: bool
}

impl MopBuilder {
	pub fn new() -> MopBuilder {
		MopBuilder {
			dispatch_cache: true,
			freeze_builtins: true
		}
	}

	///Enables or disables per-generic caching of sorted applicable methods. Defaults to `true`.
	pub fn dispatch_cache(mut self, enabled: bool) -> MopBuilder {
		self.dispatch_cache = enabled;
		self
	}

	///If `true`, the built-in classes reject redefinition. Defaults to `true`.
	pub fn freeze_builtins(mut self, frozen: bool) -> MopBuilder {
		self.freeze_builtins = frozen;
		self
	}

	pub fn build(self) -> Mop {
		let placeholder = ClassId(0);
		let mut mop = Mop {
			classes: RefCell::new(Vec::new()),
			class_names: RefCell::new(FnvHashMap::default()),
			generics: RefCell::new(Vec::new()),
			methods: RefCell::new(Vec::new()),
			builtins: Builtins {
				top: placeholder,
				object: placeholder,
				class: placeholder,
				boolean: placeholder,
				null: placeholder,
				number: placeholder,
				real: placeholder,
				integer: placeholder,
				string: placeholder,
				symbol: placeholder,
				procedure: placeholder
			},
			config: MopConfig {
				dispatch_cache: self.dispatch_cache,
				freeze_builtins: self.freeze_builtins
			},
			epoch_counter: Cell::new(0),
			hierarchy_epoch: Cell::new(0),
			listeners: RefCell::new(Vec::new())
		};

		mop.builtins = mop.define_builtins();
		mop
	}
}

impl Default for MopBuilder {
	fn default() -> MopBuilder {
		MopBuilder::new()
	}
}


//-------------------------------------------------------------------------------------------------
// Mop
//-------------------------------------------------------------------------------------------------

/**
The metaobject protocol core.

A `Mop` owns a class hierarchy, a set of generic functions and their methods, and tracks the
live instances of every class so that they can be migrated when a class is redefined.

It's single-threaded: it can't be sent or shared between threads.
*/

pub struct Mop {
	pub(crate) classes: RefCell<Vec<Rc<ClassEntry>>>,
	pub(crate) class_names: RefCell<FnvHashMap<Sym, ClassId>>,
	pub(crate) generics: RefCell<Vec<Rc<GenericEntry>>>,
	pub(crate) methods: RefCell<Vec<Rc<MethodEntry>>>,
	pub(crate) builtins: Builtins,
	pub(crate) config: MopConfig,

	//a fresh value for each ClassState ever built. accessors and instances record the epoch
	//of the layout they belong to.
	epoch_counter: Cell<u32>,

	//bumped whenever any class' cpl or layout changes. dispatch caches filled under an older
	//value are discarded on their next use.
	pub(crate) hierarchy_epoch: Cell<u64>,

	pub(crate) listeners: RefCell<Vec<Rc<InvalidationFn>>>
}

impl Mop {
	pub fn new() -> Mop {
		MopBuilder::new().build()
	}

	fn define_builtins(&self) -> Builtins {
		let frozen = self.config.freeze_builtins;
		let define = |name: &str, supers: &[ClassId], instantiable: bool| -> ClassId {
			let def = ClassDef::new(name).supers(supers).immutable(frozen);
			match self.define_class_impl(def, instantiable) {
				Ok(id) => id,
				Err(err) => panic!("failed to define built-in class {}: {}", name, err)
			}
		};

		let top = define("<top>", &[], false);
		let object = define("<object>", &[top], true);
		let class = define("<class>", &[object], false);
		let boolean = define("<boolean>", &[top], false);
		let null = define("<null>", &[top], false);
		let number = define("<number>", &[top], false);
		let real = define("<real>", &[number], false);
		let integer = define("<integer>", &[real], false);
		let string = define("<string>", &[top], false);
		let symbol = define("<symbol>", &[top], false);
		let procedure = define("<procedure>", &[top], false);

		Builtins {
			top, object, class, boolean, null, number, real, integer, string, symbol, procedure
		}
	}

	pub fn builtins(&self) -> &Builtins {
		&self.builtins
	}

	///Returns the class of any value. Instances report their own class; every other
	///variant maps onto a built-in class.
	pub fn class_of(&self, val: &Val) -> ClassId {
		let b = &self.builtins;
		match *val {
			Val::Nil => b.null,
			Val::Bool(_) => b.boolean,
			Val::Int(_) => b.integer,
			Val::Flo(_) => b.real,
			Val::Sym(_) => b.symbol,
			Val::Str(_) => b.string,
			Val::Obj(ref obj) => obj.class(),
			Val::Class(_) => b.class,
			Val::Proc(_) => b.procedure
		}
	}

	///Returns the number of classes defined so far, including the built-ins.
	pub fn class_count(&self) -> usize {
		self.classes.borrow().len()
	}

	/**
	Registers a callback which is invoked once for each method invalidated by a committed
	class redefinition, after the commit has completed.

	A method is invalidated when one of its specializer classes is changed by the commit.
	*/
	pub fn on_invalidate<F>(&self, callback: F)
	where
		F: Fn(&Mop, GenericId, MethodId) + 'static
	{
		self.listeners.borrow_mut().push(Rc::new(callback));
	}

	pub(crate) fn class_entry(&self, class: ClassId) -> MopResult<Rc<ClassEntry>> {
		match self.classes.borrow().get(class.index()) {
			Some(entry) => Ok(Rc::clone(entry)),
			None => bail!(InvalidArgument, "{:?} isn't a class of this Mop", class)
		}
	}

	pub(crate) fn generic_entry(&self, generic: GenericId) -> MopResult<Rc<GenericEntry>> {
		match self.generics.borrow().get(generic.0 as usize) {
			Some(entry) => Ok(Rc::clone(entry)),
			None => bail!(InvalidArgument, "{:?} isn't a generic function of this Mop", generic)
		}
	}

	pub(crate) fn method_entry(&self, method: MethodId) -> MopResult<Rc<MethodEntry>> {
		match self.methods.borrow().get(method.0 as usize) {
			Some(entry) => Ok(Rc::clone(entry)),
			None => bail!(InvalidArgument, "{:?} isn't a method of this Mop", method)
		}
	}

	//only called with ids taken from existing class states, which are always valid
	pub(crate) fn committed_state(&self, class: ClassId) -> Rc<ClassState> {
		self.classes.borrow()[class.index()].state()
	}

	pub(crate) fn next_epoch(&self) -> u32 {
		let epoch = self.epoch_counter.get() + 1;
		self.epoch_counter.set(epoch);
		epoch
	}

	pub(crate) fn bump_hierarchy_epoch(&self) {
		self.hierarchy_epoch.set(self.hierarchy_epoch.get() + 1);
	}
}

impl Default for Mop {
	fn default() -> Mop {
		Mop::new()
	}
}

impl Debug for Mop {
	fn fmt(&self, f: &mut Formatter) -> fmt::Result {
		write!(f, "#<mop: {} classes, {} generics, {} methods>", self.classes.borrow().len(),
		       self.generics.borrow().len(), self.methods.borrow().len())
	}
}
