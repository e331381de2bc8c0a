use fnv::{FnvHashMap};
use log::{trace};
use smallvec::{SmallVec};
use std::cell::{Cell, RefCell};
use std::cmp::{Ordering};
use std::fmt::{self, Debug, Formatter};
use std::rc::{Rc};
use super::class::{ClassId, Cpl};
use super::engine::{Mop};
use super::error::{MopResult};
use super::val::{Sym, ToSym, Val};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

///A handle to a generic function.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct GenericId(pub(crate) u32);

///A handle to a method.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct MethodId(pub(crate) u32);

impl Debug for GenericId {
	fn fmt(&self, f: &mut Formatter) -> fmt::Result {
		write!(f, "#<generic:{}>", self.0)
	}
}

impl Debug for MethodId {
	fn fmt(&self, f: &mut Formatter) -> fmt::Result {
		write!(f, "#<method:{}>", self.0)
	}
}

pub type MethodFn = dyn Fn(&Mop, &NextMethod, &[Val]) -> MopResult<Val>;

/**
The body of a method.

Bodies are opaque to the core. They're invoked with the [`Mop`](struct.Mop.html), a
[`NextMethod`](struct.NextMethod.html) for calling the next less-specific method, and the
call's arguments.
*/

#[derive(Clone)]
pub struct MethodBody(Rc<MethodFn>);

impl MethodBody {
	pub fn new<F>(f: F) -> MethodBody
	where
		F: Fn(&Mop, &NextMethod, &[Val]) -> MopResult<Val> + 'static
	{
		MethodBody(Rc::new(f))
	}

	fn call(&self, mop: &Mop, next: &NextMethod, args: &[Val]) -> MopResult<Val> {
		(self.0)(mop, next, args)
	}
}

pub(crate) type Specializers = SmallVec<[ClassId; 4]>;
type CacheKey = SmallVec<[ClassId; 4]>;

pub(crate) struct MethodEntry {
	pub(crate) specializers: Specializers,
	pub(crate) variadic: bool,
	pub(crate) body: MethodBody,
	pub(crate) generic: Cell<Option<GenericId>>
}

pub(crate) struct GenericEntry {
	pub(crate) name: Sym,

	//in registration order, which is also the final tie-break when sorting
	pub(crate) methods: RefCell<Vec<MethodId>>,
	pub(crate) cache: RefCell<DispatchCache>
}

//sorted applicable methods, keyed by the classes of every argument. only valid for the
//hierarchy epoch it was filled under.
#[derive(Default)]
pub(crate) struct DispatchCache {
	epoch: u64,
	entries: FnvHashMap<CacheKey, Rc<[MethodId]>>
}

impl DispatchCache {
	pub(crate) fn clear(&mut self) {
		self.entries.clear();
	}
}


//-------------------------------------------------------------------------------------------------
// NextMethod
//-------------------------------------------------------------------------------------------------

/**
The "call the next method" capability which is passed to every method body.

A `NextMethod` stands for the remaining, less-specific applicable methods of the current
call. Calling it invokes the first of them; once none remain, calling it fails with
`NoNextMethod`.
*/

#[derive(Clone)]
pub struct NextMethod {
	generic: GenericId,
	methods: Rc<[MethodId]>,
	pos: usize,
	args: Rc<[Val]>
}

impl NextMethod {
	pub fn generic(&self) -> GenericId {
		self.generic
	}

	///Returns `true` if calling this `NextMethod` would invoke a method.
	pub fn has_next(&self) -> bool {
		self.pos < self.methods.len()
	}

	///The methods which remain to be called, most specific first.
	pub fn remaining(&self) -> &[MethodId] {
		&self.methods[self.pos.min(self.methods.len()) ..]
	}

	///The arguments which the next method receives when `call` is passed `None`.
	pub fn args(&self) -> &[Val] {
		&self.args
	}

	/**
	Invokes the next method, either with the current call's arguments (`None`) or with
	replacement arguments.
	*/
	pub fn call(&self, mop: &Mop, args: Option<&[Val]>) -> MopResult<Val> {
		if !self.has_next() {
			let name = mop.generic_entry(self.generic)?.name.clone();
			bail!(NoNextMethod, "no next method available in generic '{}'", name)
		}

		let args = match args {
			Some(args) => Rc::from(args),
			None => Rc::clone(&self.args)
		};

		mop.invoke_method(self.generic, Rc::clone(&self.methods), self.pos, args)
	}
}

impl Debug for NextMethod {
	fn fmt(&self, f: &mut Formatter) -> fmt::Result {
		write!(f, "#<next-method {:?} {:?}>", self.generic, self.remaining())
	}
}


//-------------------------------------------------------------------------------------------------
// generic function operations
//-------------------------------------------------------------------------------------------------

impl Mop {
	pub fn make_generic<S: ToSym>(&self, name: S) -> GenericId {
		let mut generics = self.generics.borrow_mut();
		let id = GenericId(generics.len() as u32);
		generics.push(Rc::new(GenericEntry {
			name: name.to_sym(),
			methods: RefCell::new(Vec::new()),
			cache: RefCell::new(DispatchCache::default())
		}));

		id
	}

	/**
	Creates a method which isn't yet attached to any generic function.

	`specializers` has one class per required parameter. A variadic method also accepts any
	number of trailing arguments, which are unconstrained.
	*/
	pub fn make_method(
		&self,
		specializers: &[ClassId],
		variadic: bool,
		body: MethodBody
	) -> MopResult<MethodId> {
		for &class in specializers {
			self.class_entry(class)?;
		}

		let mut methods = self.methods.borrow_mut();
		let id = MethodId(methods.len() as u32);
		methods.push(Rc::new(MethodEntry {
			specializers: Specializers::from_slice(specializers),
			variadic,
			body,
			generic: Cell::new(None)
		}));

		Ok(id)
	}

	pub fn generic_name(&self, generic: GenericId) -> MopResult<Sym> {
		Ok(self.generic_entry(generic)?.name.clone())
	}

	///Returns the generic function's methods in registration order.
	pub fn generic_methods(&self, generic: GenericId) -> MopResult<Vec<MethodId>> {
		Ok(self.generic_entry(generic)?.methods.borrow().clone())
	}

	pub fn method_specializers(&self, method: MethodId) -> MopResult<Vec<ClassId>> {
		Ok(self.method_entry(method)?.specializers.to_vec())
	}

	pub fn method_is_variadic(&self, method: MethodId) -> MopResult<bool> {
		Ok(self.method_entry(method)?.variadic)
	}

	///Returns the generic function which the method is attached to, if any.
	pub fn method_generic(&self, method: MethodId) -> MopResult<Option<GenericId>> {
		Ok(self.method_entry(method)?.generic.get())
	}

	/**
	Attaches a method to a generic function.

	An existing method with an identical signature (the same specializers, and the same
	variadic flag) is removed, and the new method takes its place in the registration order.
	The new method is recorded in the direct-method set of each of its specializer classes.
	*/
	pub fn add_method(&self, generic: GenericId, method: MethodId) -> MopResult<()> {
		let gf = self.generic_entry(generic)?;
		let entry = self.method_entry(method)?;

		match entry.generic.get() {
			Some(owner) if owner == generic => return Ok(()),
			Some(owner) => bail!(InvalidArgument, "{:?} already belongs to generic '{}'",
			                     method, self.generic_name(owner)?),
			None => ()
		}

		let mut replaced = None;
		{
			let arena = self.methods.borrow();
			let mut methods = gf.methods.borrow_mut();
			let same_signature = methods.iter().position(|&m| {
				let other = &arena[m.0 as usize];
				other.specializers == entry.specializers && other.variadic == entry.variadic
			});

			match same_signature {
				Some(i) => replaced = Some(std::mem::replace(&mut methods[i], method)),
				None => methods.push(method)
			}
		}

		if let Some(old) = replaced {
			self.detach_method(old)?;
		}

		entry.generic.set(Some(generic));
		for &class in entry.specializers.iter() {
			self.add_direct_method(class, method)?;
		}

		gf.cache.borrow_mut().clear();

		trace!("added {:?} to generic '{}'{}", method, gf.name,
		       replaced.map(|old| format!(", replacing {:?}", old)).unwrap_or_default());
		Ok(())
	}

	/**
	Detaches a method from a generic function, and removes it from the direct-method set of
	each of its specializer classes. Removing a method which isn't attached is a no-op.
	*/
	pub fn remove_method(&self, generic: GenericId, method: MethodId) -> MopResult<()> {
		let gf = self.generic_entry(generic)?;
		let entry = self.method_entry(method)?;
		if entry.generic.get() != Some(generic) {
			return Ok(())
		}

		gf.methods.borrow_mut().retain(|&m| m != method);
		self.detach_method(method)?;
		gf.cache.borrow_mut().clear();

		trace!("removed {:?} from generic '{}'", method, gf.name);
		Ok(())
	}

	fn detach_method(&self, method: MethodId) -> MopResult<()> {
		let entry = self.method_entry(method)?;
		entry.generic.set(None);
		for &class in entry.specializers.iter() {
			self.remove_direct_method(class, method)?;
		}

		Ok(())
	}

	//a method is applicable if there are enough arguments for its specializers (exactly enough
	//unless it's variadic), and each argument's class has the corresponding specializer in
	//its cpl
	fn is_applicable(&self, entry: &MethodEntry, arg_cpls: &[Cpl]) -> bool {
		let required = entry.specializers.len();
		if arg_cpls.len() < required || (!entry.variadic && arg_cpls.len() != required) {
			return false
		}

		entry.specializers.iter().zip(arg_cpls.iter()).all(|(spec, cpl)| cpl.contains(spec))
	}

	fn arg_cpls(&self, args: &[Val]) -> MopResult<SmallVec<[Cpl; 4]>> {
		args.iter()
			.map(|arg| Ok(self.class_entry(self.class_of(arg))?.state().cpl.clone()))
			.collect()
	}

	/**
	Returns the generic function's applicable methods for these arguments, in registration
	order. An empty result isn't an error here; see [`apply_generic`](#method.apply_generic).
	*/
	pub fn compute_applicable_methods(
		&self,
		generic: GenericId,
		args: &[Val]
	) -> MopResult<Vec<MethodId>> {
		let gf = self.generic_entry(generic)?;
		let arg_cpls = self.arg_cpls(args)?;

		let candidates = gf.methods.borrow().clone();
		let mut applicable = Vec::new();
		for method in candidates {
			let entry = self.method_entry(method)?;
			if self.is_applicable(&entry, &arg_cpls) {
				applicable.push(method);
			}
		}

		Ok(applicable)
	}

	/**
	Sorts applicable methods from most to least specific, for these arguments.

	Two methods are compared one required parameter at a time, from left to right. At the
	first position where their specializers differ, the method whose specializer appears
	earlier in the argument's class precedence list is more specific. If every shared position
	ties, the method with more specializers is more specific, and then a non-variadic method
	is more specific than a variadic one. Remaining ties keep their input order.
	*/
	pub fn sort_methods(&self, methods: &[MethodId], args: &[Val]) -> MopResult<Vec<MethodId>> {
		let arg_cpls = self.arg_cpls(args)?;
		let mut entries = Vec::with_capacity(methods.len());
		for &method in methods {
			entries.push((method, self.method_entry(method)?));
		}

		entries.sort_by(|(_, a), (_, b)| more_specific(a, b, &arg_cpls));
		Ok(entries.into_iter().map(|(method, _)| method).collect())
	}

	/**
	Builds the next-method capability for `methods`, which should be the sorted applicable
	methods remaining after the one about to run. Calling it invokes `methods[0]`.
	*/
	pub fn make_next_method(
		&self,
		generic: GenericId,
		methods: &[MethodId],
		args: &[Val]
	) -> MopResult<NextMethod> {
		self.generic_entry(generic)?;
		Ok(NextMethod {
			generic,
			methods: Rc::from(methods),
			pos: 0,
			args: Rc::from(args)
		})
	}

	//the dispatch sequence with caching: applicable methods, sorted. the cache is keyed by
	//the arguments' classes and dropped wholesale when the hierarchy epoch moves.
	fn sorted_applicable_methods(
		&self,
		generic: GenericId,
		args: &[Val]
	) -> MopResult<Rc<[MethodId]>> {
		let gf = self.generic_entry(generic)?;
		let key: CacheKey = args.iter().map(|arg| self.class_of(arg)).collect();

		if self.config.dispatch_cache {
			let mut cache = gf.cache.borrow_mut();
			let epoch = self.hierarchy_epoch.get();
			if cache.epoch != epoch {
				cache.clear();
				cache.epoch = epoch;
			}

			if let Some(methods) = cache.entries.get(&key) {
				return Ok(Rc::clone(methods))
			}
		}

		let applicable = self.compute_applicable_methods(generic, args)?;
		let sorted: Rc<[MethodId]> = Rc::from(self.sort_methods(&applicable, args)?);

		//the cache may have been cleared or re-keyed by a re-entrant call in the meantime,
		//so only store the result if the epoch still matches
		if self.config.dispatch_cache {
			let mut cache = gf.cache.borrow_mut();
			if cache.epoch == self.hierarchy_epoch.get() {
				cache.entries.insert(key, Rc::clone(&sorted));
			}
		}

		Ok(sorted)
	}

	/**
	Invokes a generic function: computes and sorts its applicable methods, then calls the
	most specific one with a [`NextMethod`](struct.NextMethod.html) for the rest.

	Fails with `NoApplicableMethod` if no method is applicable.
	*/
	pub fn apply_generic(&self, generic: GenericId, args: &[Val]) -> MopResult<Val> {
		let methods = self.sorted_applicable_methods(generic, args)?;
		if methods.is_empty() {
			let gf = self.generic_entry(generic)?;
			let arg_types: Vec<String> = args.iter()
				.map(|arg| self.class_name(self.class_of(arg)).map(|name| name.to_string()))
				.collect::<MopResult<_>>()?;

			bail!(NoApplicableMethod, "no method of generic '{}' is applicable to ({})",
			      gf.name, arg_types.join(" "))
		}

		self.invoke_method(generic, methods, 0, Rc::from(args))
	}

	//calls methods[pos], passing it a NextMethod for methods[pos + 1 ..]. no core state is
	//borrowed while the body runs.
	pub(crate) fn invoke_method(
		&self,
		generic: GenericId,
		methods: Rc<[MethodId]>,
		pos: usize,
		args: Rc<[Val]>
	) -> MopResult<Val> {
		let body = self.method_entry(methods[pos])?.body.clone();
		let next = NextMethod {
			generic,
			methods,
			pos: pos + 1,
			args: Rc::clone(&args)
		};

		body.call(self, &next, &args)
	}
}

fn more_specific(a: &MethodEntry, b: &MethodEntry, arg_cpls: &[Cpl]) -> Ordering {
	let position_in = |cpl: &Cpl, class: ClassId| {
		cpl.iter().position(|&c| c == class).unwrap_or(usize::MAX)
	};

	let shared = a.specializers.iter().zip(b.specializers.iter()).zip(arg_cpls.iter());
	for ((&spec_a, &spec_b), cpl) in shared {
		if spec_a != spec_b {
			let ordering = position_in(cpl, spec_a).cmp(&position_in(cpl, spec_b));
			if ordering != Ordering::Equal {
				return ordering
			}
		}
	}

	b.specializers.len().cmp(&a.specializers.len())
		.then_with(|| a.variadic.cmp(&b.variadic))
}
