use std::cmp::{Ordering};
use std::fmt::{self, Debug, Display, Formatter};
use std::hash::{Hash, Hasher};
use std::ops::{Deref};
use std::rc::{Rc};
use super::class::{ClassId};
use super::engine::{Mop};
use super::error::{MopResult};
use super::obj::{Obj};


//-------------------------------------------------------------------------------------------------
// Sym
//-------------------------------------------------------------------------------------------------

/**
A symbol, used for class names, slot names and init-keywords.

Interning belongs to the hosting evaluator, so a `Sym` is simply a shared string which is
compared by name.
*/

#[derive(Clone)]
pub struct Sym(Rc<str>);

impl Sym {
	pub fn new(name: &str) -> Sym {
		Sym(Rc::from(name))
	}

	pub fn name(&self) -> &str {
		&self.0
	}
}

impl PartialEq for Sym {
	fn eq(&self, other: &Sym) -> bool {
		Rc::ptr_eq(&self.0, &other.0) || *self.0 == *other.0
	}
}

impl Eq for Sym { }

impl Hash for Sym {
	fn hash<H: Hasher>(&self, state: &mut H) {
		self.0.hash(state)
	}
}

impl PartialOrd for Sym {
	fn partial_cmp(&self, other: &Sym) -> Option<Ordering> {
		Some(self.cmp(other))
	}
}

impl Ord for Sym {
	fn cmp(&self, other: &Sym) -> Ordering {
		(*self.0).cmp(&*other.0)
	}
}

impl Display for Sym {
	fn fmt(&self, f: &mut Formatter) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl Debug for Sym {
	fn fmt(&self, f: &mut Formatter) -> fmt::Result {
		write!(f, "'{}", &self.0)
	}
}

/**
A type which can be converted to a [`Sym`](struct.Sym.html).

Most functions which receive a name are generic over `S: ToSym`, so that they accept either
a `Sym` or a string.
*/

pub trait ToSym {
	fn to_sym(&self) -> Sym;
}

impl<T> ToSym for T
where
	T: Deref,
	T::Target: ToSym
{
	fn to_sym(&self) -> Sym {
		(**self).to_sym()
	}
}

impl ToSym for Sym {
	fn to_sym(&self) -> Sym {
		self.clone()
	}
}

impl ToSym for str {
	fn to_sym(&self) -> Sym {
		Sym::new(self)
	}
}


//-------------------------------------------------------------------------------------------------
// Proc
//-------------------------------------------------------------------------------------------------

pub type ProcFn = dyn Fn(&Mop, &[Val]) -> MopResult<Val>;

/**
A user-level procedure, as seen by the core.

This is the evaluator callback contract: virtual slot getters and setters, and init-thunks,
are all `Proc`s. The core invokes them with the [`Mop`](struct.Mop.html) so that they can
re-enter it, and passes their results or errors through unchanged.
*/

#[derive(Clone)]
pub struct Proc {
	name: Option<Sym>,
	f: Rc<ProcFn>
}

impl Proc {
	pub fn new<F>(f: F) -> Proc
	where
		F: Fn(&Mop, &[Val]) -> MopResult<Val> + 'static
	{
		Proc {
			name: None,
			f: Rc::new(f)
		}
	}

	pub fn named<S, F>(name: S, f: F) -> Proc
	where
		S: ToSym,
		F: Fn(&Mop, &[Val]) -> MopResult<Val> + 'static
	{
		Proc {
			name: Some(name.to_sym()),
			f: Rc::new(f)
		}
	}

	pub fn name(&self) -> Option<&Sym> {
		self.name.as_ref()
	}

	pub fn call(&self, mop: &Mop, args: &[Val]) -> MopResult<Val> {
		(self.f)(mop, args)
	}

	pub fn ptr_eq(proc0: &Proc, proc1: &Proc) -> bool {
		Rc::ptr_eq(&proc0.f, &proc1.f)
	}
}

impl Debug for Proc {
	fn fmt(&self, f: &mut Formatter) -> fmt::Result {
		match self.name {
			Some(ref name) => write!(f, "#<proc:{}>", name),
			None => f.write_str("#<proc>")
		}
	}
}


//-------------------------------------------------------------------------------------------------
// Val
//-------------------------------------------------------------------------------------------------

/**
Any value which can be stored in a slot or passed to a generic function.

The value representation belongs to the hosting evaluator; this is the minimal closed set of
variants which the core needs in order to compute each value's class.
*/

#[derive(Clone)]
pub enum Val {
	Nil,
	Bool(bool),
	Int(i64),
	Flo(f64),
	Sym(Sym),
	Str(Rc<str>),
	Obj(Obj),
	Class(ClassId),
	Proc(Proc)
}

impl Default for Val {
	fn default() -> Val {
		Val::Nil
	}
}

macro_rules! impl_val {
	($(($variant:ident, $type:ty, $type_name:literal, $a_type_name:literal, $is_type:ident,
	    $unwrap_type:ident)),+) => (
		impl Val {
			///Returns the name of this value's primitive type, such as `"nil"` or `"obj"`.
			pub fn type_name(&self) -> &'static str {
				match *self {
					Val::Nil => "nil",
					$(Val::$variant(_) => $type_name),+
				}
			}

			///Returns the name of this value's primitive type, prefixed with an article.
			pub fn a_type_name(&self) -> &'static str {
				match *self {
					Val::Nil => "a nil",
					$(Val::$variant(_) => $a_type_name),+
				}
			}

			pub fn is_nil(&self) -> bool {
				matches!(*self, Val::Nil)
			}

			$(
				#[inline]
				pub fn $is_type(&self) -> bool {
					matches!(*self, Val::$variant(_))
				}

				#[inline]
				pub fn $unwrap_type(self) -> $type {
					match self {
						Val::$variant(inner) => inner,
						_ => panic!("attempted to unwrap {} Val as {}", self.a_type_name(),
						            $a_type_name)
					}
				}
			)+
		}
	);
}

impl_val!(
	(Bool, bool, "bool", "a bool", is_bool, unwrap_bool),
	(Int, i64, "int", "an int", is_int, unwrap_int),
	(Flo, f64, "flo", "a flo", is_flo, unwrap_flo),
	(Sym, Sym, "sym", "a sym", is_sym, unwrap_sym),
	(Str, Rc<str>, "str", "a str", is_str, unwrap_str),
	(Obj, Obj, "obj", "an obj", is_obj, unwrap_obj),
	(Class, ClassId, "class", "a class", is_class, unwrap_class),
	(Proc, Proc, "proc", "a proc", is_proc, unwrap_proc)
);

//objs and procs compare by identity; everything else compares by value
impl PartialEq for Val {
	fn eq(&self, other: &Val) -> bool {
		match (self, other) {
			(Val::Nil, Val::Nil) => true,
			(Val::Bool(a), Val::Bool(b)) => a == b,
			(Val::Int(a), Val::Int(b)) => a == b,
			(Val::Flo(a), Val::Flo(b)) => a == b,
			(Val::Sym(a), Val::Sym(b)) => a == b,
			(Val::Str(a), Val::Str(b)) => a == b,
			(Val::Obj(a), Val::Obj(b)) => Obj::ptr_eq(a, b),
			(Val::Class(a), Val::Class(b)) => a == b,
			(Val::Proc(a), Val::Proc(b)) => Proc::ptr_eq(a, b),
			_ => false
		}
	}
}

impl Debug for Val {
	fn fmt(&self, f: &mut Formatter) -> fmt::Result {
		match *self {
			Val::Nil => f.write_str("#n"),
			Val::Bool(b) => write!(f, "{}", b),
			Val::Int(i) => write!(f, "{}", i),
			Val::Flo(flo) => write!(f, "{:?}", flo),
			Val::Sym(ref sym) => write!(f, "{:?}", sym),
			Val::Str(ref st) => write!(f, "{:?}", &**st),
			Val::Obj(ref obj) => write!(f, "{:?}", obj),
			Val::Class(class) => write!(f, "{:?}", class),
			Val::Proc(ref p) => write!(f, "{:?}", p)
		}
	}
}

impl From<bool> for Val {
	fn from(b: bool) -> Val {
		Val::Bool(b)
	}
}

impl From<i64> for Val {
	fn from(i: i64) -> Val {
		Val::Int(i)
	}
}

impl From<i32> for Val {
	fn from(i: i32) -> Val {
		Val::Int(i64::from(i))
	}
}

impl From<f64> for Val {
	fn from(flo: f64) -> Val {
		Val::Flo(flo)
	}
}

impl From<&str> for Val {
	fn from(st: &str) -> Val {
		Val::Str(Rc::from(st))
	}
}

impl From<Sym> for Val {
	fn from(sym: Sym) -> Val {
		Val::Sym(sym)
	}
}

impl From<Obj> for Val {
	fn from(obj: Obj) -> Val {
		Val::Obj(obj)
	}
}

impl From<ClassId> for Val {
	fn from(class: ClassId) -> Val {
		Val::Class(class)
	}
}

impl From<Proc> for Val {
	fn from(p: Proc) -> Val {
		Val::Proc(p)
	}
}
