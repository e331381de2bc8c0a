#![forbid(unsafe_code)]

/*!
A metaobject protocol core: classes with C3 linearization, slot storage behind accessor
objects, multiple-dispatch generic functions and live class redefinition.

The core is independent of any particular evaluator. Values are represented by the small
[`Val`](enum.Val.html) enum, and user-level code reaches the core through
[`Proc`](struct.Proc.html) and [`MethodBody`](struct.MethodBody.html) callbacks, which receive
the [`Mop`](struct.Mop.html) so that they can call back into it.

```rust
use mop_engine::{ClassDef, Mop, MopResult, SlotDef, Val};

fn main() -> MopResult<()> {
	let mop = Mop::new();
	let point = mop.define_class(
		ClassDef::new("<point>")
			.slot(SlotDef::instance("x").init_keyword("x").init_value(0))
			.slot(SlotDef::instance("y").init_keyword("y").init_value(0))
	)?;

	let p = mop.make_instance(point, &[("x", Val::Int(3))])?;
	assert_eq!(mop.slot_ref(&p, "x")?, Val::Int(3));
	assert_eq!(mop.slot_ref(&p, "y")?, Val::Int(0));
	Ok(())
}
```
*/

#[macro_use]
mod error;

mod class;
mod engine;
mod generic;
mod obj;
mod redefine;
mod slot;
mod val;

pub use self::{
	class::{ClassDef, ClassId},
	engine::{Builtins, Mop, MopBuilder},
	error::{ErrorKind, MopError, MopResult},
	generic::{GenericId, MethodBody, MethodFn, MethodId, NextMethod},
	obj::{Obj},
	redefine::{ClassRedefinition, RedefinitionReport},
	slot::{Allocation, NativeGetter, NativeSetter, SlotAccessor, SlotDef, Storage},
	val::{Proc, ProcFn, Sym, ToSym, Val}
};
