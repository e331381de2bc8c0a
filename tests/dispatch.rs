use mop_engine::{
	ClassDef, ClassId, ErrorKind, GenericId, MethodBody, MethodId, Mop, MopBuilder, MopResult,
	SlotDef, Val
};
use std::cell::{RefCell};
use std::rc::{Rc};

//a method body which returns its tag followed by the next method's result, if any
fn tagged(tag: &'static str) -> MethodBody {
	MethodBody::new(move |mop, next, _args| {
		if next.has_next() {
			match next.call(mop, None)? {
				Val::Str(rest) => Ok(Val::from(&*format!("{} {}", tag, rest))),
				other => Ok(other)
			}
		} else {
			Ok(Val::from(tag))
		}
	})
}

fn leaf(tag: &'static str) -> MethodBody {
	MethodBody::new(move |_, _, _| Ok(Val::from(tag)))
}

fn add(mop: &Mop, gf: GenericId, specs: &[ClassId], body: MethodBody) -> MopResult<MethodId> {
	let method = mop.make_method(specs, false, body)?;
	mop.add_method(gf, method)?;
	Ok(method)
}

struct Shapes {
	shape: ClassId,
	circle: ClassId,
	square: ClassId
}

fn shapes(mop: &Mop) -> MopResult<Shapes> {
	let shape = mop.define_class(ClassDef::new("<shape>"))?;
	let circle = mop.define_class(
		ClassDef::new("<circle>").superclass(shape).slot(SlotDef::instance("r").init_value(1))
	)?;
	let square = mop.define_class(ClassDef::new("<square>").superclass(shape))?;
	Ok(Shapes { shape, circle, square })
}

// ordering and next-method

#[test]
fn most_specific_method_runs_first() -> MopResult<()> {
	let mop = Mop::new();
	let s = shapes(&mop)?;
	let describe = mop.make_generic("describe");

	let general = add(&mop, describe, &[s.shape], tagged("shape"))?;
	let specific = add(&mop, describe, &[s.circle], tagged("circle"))?;

	let c = Val::Obj(mop.make_instance(s.circle, &[])?);
	let q = Val::Obj(mop.make_instance(s.square, &[])?);

	let applicable = mop.compute_applicable_methods(describe, &[c.clone()])?;
	assert_eq!(applicable, vec![general, specific]);
	assert_eq!(mop.sort_methods(&applicable, &[c.clone()])?, vec![specific, general]);

	assert_eq!(mop.apply_generic(describe, &[c])?, Val::from("circle shape"));
	assert_eq!(mop.apply_generic(describe, &[q])?, Val::from("shape"));
	Ok(())
}

#[test]
fn next_method_beyond_least_specific() -> MopResult<()> {
	let mop = Mop::new();
	let s = shapes(&mop)?;
	let gf = mop.make_generic("only");

	add(&mop, gf, &[s.shape], MethodBody::new(|mop, next, _| next.call(mop, None)))?;

	let c = Val::Obj(mop.make_instance(s.circle, &[])?);
	let err = mop.apply_generic(gf, &[c]).unwrap_err();
	assert_eq!(err.kind(), ErrorKind::NoNextMethod);
	Ok(())
}

#[test]
fn next_method_with_replacement_args() -> MopResult<()> {
	let mop = Mop::new();
	let b = *mop.builtins();
	let gf = mop.make_generic("double");

	add(&mop, gf, &[b.integer], MethodBody::new(|mop, next, args| {
		match args[0] {
			Val::Int(i) => next.call(mop, Some(&[Val::Int(i * 2)][..])),
			_ => unreachable!()
		}
	}))?;
	add(&mop, gf, &[b.number], MethodBody::new(|_, _, args| Ok(args[0].clone())))?;

	assert_eq!(mop.apply_generic(gf, &[Val::Int(21)])?, Val::Int(42));
	Ok(())
}

// method registration

#[test]
fn replacing_a_method_keeps_its_position() -> MopResult<()> {
	let mop = Mop::new();
	let s = shapes(&mop)?;
	let gf = mop.make_generic("name");

	let m1 = add(&mop, gf, &[s.shape], leaf("old"))?;
	let m2 = add(&mop, gf, &[s.circle], leaf("circle"))?;
	let m3 = add(&mop, gf, &[s.shape], leaf("new"))?;

	assert_eq!(mop.generic_methods(gf)?, vec![m3, m2]);
	assert_eq!(mop.method_generic(m1)?, None);
	assert_eq!(mop.method_generic(m3)?, Some(gf));
	assert_eq!(mop.class_direct_methods(s.shape)?, vec![m3]);

	let q = Val::Obj(mop.make_instance(s.square, &[])?);
	assert_eq!(mop.apply_generic(gf, &[q])?, Val::from("new"));
	Ok(())
}

#[test]
fn removing_a_method() -> MopResult<()> {
	let mop = Mop::new();
	let s = shapes(&mop)?;
	let gf = mop.make_generic("name");

	let m1 = add(&mop, gf, &[s.shape], leaf("shape"))?;
	let m2 = add(&mop, gf, &[s.circle], leaf("circle"))?;

	let c = Val::Obj(mop.make_instance(s.circle, &[])?);
	assert_eq!(mop.apply_generic(gf, &[c.clone()])?, Val::from("circle"));

	mop.remove_method(gf, m2)?;
	assert_eq!(mop.generic_methods(gf)?, vec![m1]);
	assert!(mop.class_direct_methods(s.circle)?.is_empty());
	assert_eq!(mop.apply_generic(gf, &[c])?, Val::from("shape"));

	//removing it again is a no-op
	mop.remove_method(gf, m2)?;
	assert_eq!(mop.generic_methods(gf)?, vec![m1]);
	Ok(())
}

#[test]
fn a_method_belongs_to_one_generic() -> MopResult<()> {
	let mop = Mop::new();
	let s = shapes(&mop)?;
	let gf0 = mop.make_generic("first");
	let gf1 = mop.make_generic("second");

	let m = add(&mop, gf0, &[s.shape], leaf("x"))?;
	let err = mop.add_method(gf1, m).unwrap_err();
	assert_eq!(err.kind(), ErrorKind::InvalidArgument);
	assert!(mop.generic_methods(gf1)?.is_empty());
	Ok(())
}

// matching and arity

#[test]
fn dispatch_on_several_arguments() -> MopResult<()> {
	let mop = Mop::new();
	let s = shapes(&mop)?;
	let collide = mop.make_generic("collide");

	add(&mop, collide, &[s.shape, s.shape], leaf("shape-shape"))?;
	add(&mop, collide, &[s.circle, s.shape], leaf("circle-shape"))?;
	add(&mop, collide, &[s.shape, s.circle], leaf("shape-circle"))?;

	let c = Val::Obj(mop.make_instance(s.circle, &[])?);
	let q = Val::Obj(mop.make_instance(s.square, &[])?);

	//the leftmost argument is the most significant
	assert_eq!(mop.apply_generic(collide, &[c.clone(), c.clone()])?, Val::from("circle-shape"));
	assert_eq!(mop.apply_generic(collide, &[q.clone(), c.clone()])?, Val::from("shape-circle"));
	assert_eq!(mop.apply_generic(collide, &[q.clone(), q.clone()])?, Val::from("shape-shape"));

	let err = mop.apply_generic(collide, &[q, Val::Int(1)]).unwrap_err();
	assert_eq!(err.kind(), ErrorKind::NoApplicableMethod);
	Ok(())
}

#[test]
fn applicable_methods_follow_registration_order() -> MopResult<()> {
	let mop = Mop::new();
	let s = shapes(&mop)?;
	let gf = mop.make_generic("area");

	let on_square = add(&mop, gf, &[s.square], leaf("square"))?;
	let on_shape = add(&mop, gf, &[s.shape], leaf("shape"))?;
	let on_circle = add(&mop, gf, &[s.circle], leaf("circle"))?;

	let c = [Val::Obj(mop.make_instance(s.circle, &[])?)];
	let q = [Val::Obj(mop.make_instance(s.square, &[])?)];

	//unsorted: inapplicable methods are filtered out, the rest stay in registration order
	assert_eq!(mop.compute_applicable_methods(gf, &c)?, vec![on_shape, on_circle]);
	assert_eq!(mop.compute_applicable_methods(gf, &q)?, vec![on_square, on_shape]);
	assert!(mop.compute_applicable_methods(gf, &[Val::Int(1)])?.is_empty());
	Ok(())
}

#[test]
fn arity_rules() -> MopResult<()> {
	let mop = Mop::new();
	let b = *mop.builtins();
	let gf = mop.make_generic("arity");

	let fixed = mop.make_method(&[b.integer], false, leaf("fixed"))?;
	let rest = mop.make_method(&[b.integer], true, leaf("rest"))?;
	mop.add_method(gf, fixed)?;
	mop.add_method(gf, rest)?;

	//same specializers but a different variadic flag, so neither replaces the other
	assert_eq!(mop.generic_methods(gf)?, vec![fixed, rest]);

	let one = [Val::Int(1)];
	let three = [Val::Int(1), Val::from("a"), Val::Nil];
	assert_eq!(mop.compute_applicable_methods(gf, &one)?, vec![fixed, rest]);
	assert_eq!(mop.compute_applicable_methods(gf, &three)?, vec![rest]);
	assert!(mop.compute_applicable_methods(gf, &[])?.is_empty());

	//the non-variadic method is more specific
	assert_eq!(mop.apply_generic(gf, &one)?, Val::from("fixed"));
	assert_eq!(mop.apply_generic(gf, &three)?, Val::from("rest"));
	assert_eq!(mop.apply_generic(gf, &[]).unwrap_err().kind(), ErrorKind::NoApplicableMethod);
	Ok(())
}

#[test]
fn more_specializers_is_more_specific() -> MopResult<()> {
	let mop = Mop::new();
	let b = *mop.builtins();
	let gf = mop.make_generic("combine");

	let short = mop.make_method(&[b.integer], true, leaf("short"))?;
	let long = mop.make_method(&[b.integer, b.top], true, leaf("long"))?;
	mop.add_method(gf, short)?;
	mop.add_method(gf, long)?;

	let args = [Val::Int(1), Val::Int(2)];
	let applicable = mop.compute_applicable_methods(gf, &args)?;
	assert_eq!(mop.sort_methods(&applicable, &args)?, vec![long, short]);
	Ok(())
}

#[test]
fn builtin_classes_dispatch() -> MopResult<()> {
	let mop = Mop::new();
	let b = *mop.builtins();
	let gf = mop.make_generic("kind");

	add(&mop, gf, &[b.number], leaf("number"))?;
	add(&mop, gf, &[b.integer], tagged("integer"))?;
	add(&mop, gf, &[b.top], leaf("anything"))?;

	assert_eq!(mop.apply_generic(gf, &[Val::Flo(0.5)])?, Val::from("number"));
	assert_eq!(mop.apply_generic(gf, &[Val::Int(3)])?, Val::from("integer number"));
	assert_eq!(mop.apply_generic(gf, &[Val::from("s")])?, Val::from("anything"));
	Ok(())
}

#[test]
fn next_method_reflection() -> MopResult<()> {
	let mop = Mop::new();
	let s = shapes(&mop)?;
	let gf = mop.make_generic("chain");

	let m1 = add(&mop, gf, &[s.circle], leaf("circle"))?;
	let m2 = add(&mop, gf, &[s.shape], leaf("shape"))?;

	let c = Val::Obj(mop.make_instance(s.circle, &[])?);
	let next = mop.make_next_method(gf, &[m2], &[c.clone()])?;
	assert!(next.has_next());
	assert_eq!(next.remaining(), &[m2]);
	assert_eq!(next.call(&mop, None)?, Val::from("shape"));

	let sorted = mop.sort_methods(&[m2, m1], &[c])?;
	assert_eq!(sorted, vec![m1, m2]);
	Ok(())
}

// caching

fn cache_survives_redefinition(mop: &Mop) -> MopResult<()> {
	let base = mop.define_class(ClassDef::new("<base>"))?;
	let mixin = mop.define_class(ClassDef::new("<mixin>"))?;
	let leafc = mop.define_class(ClassDef::new("<leaf>").superclass(base))?;
	let gf = mop.make_generic("which");

	add(mop, gf, &[base], leaf("base"))?;
	add(mop, gf, &[mixin], leaf("mixin"))?;

	let obj = Val::Obj(mop.make_instance(leafc, &[])?);
	assert_eq!(mop.apply_generic(gf, &[obj.clone()])?, Val::from("base"));
	assert_eq!(mop.apply_generic(gf, &[obj.clone()])?, Val::from("base"));

	let mut draft = mop.start_class_redefinition(leafc)?;
	draft.set_direct_supers(&[mixin, base]);
	draft.commit()?;

	assert_eq!(mop.apply_generic(gf, &[obj.clone()])?, Val::from("mixin"));

	let mut draft = mop.start_class_redefinition(leafc)?;
	draft.set_direct_supers(&[mixin]);
	draft.commit()?;

	let applicable = mop.compute_applicable_methods(gf, &[obj.clone()])?;
	assert_eq!(applicable.len(), 1);
	assert_eq!(mop.apply_generic(gf, &[obj])?, Val::from("mixin"));
	Ok(())
}

#[test]
fn cached_dispatch_sees_redefinition() -> MopResult<()> {
	cache_survives_redefinition(&Mop::new())
}

#[test]
fn uncached_dispatch_sees_redefinition() -> MopResult<()> {
	cache_survives_redefinition(&MopBuilder::new().dispatch_cache(false).build())
}

#[test]
fn adding_a_method_refreshes_the_cache() -> MopResult<()> {
	let mop = Mop::new();
	let s = shapes(&mop)?;
	let gf = mop.make_generic("name");
	let log = Rc::new(RefCell::new(Vec::new()));

	add(&mop, gf, &[s.shape], leaf("shape"))?;
	let c = Val::Obj(mop.make_instance(s.circle, &[])?);
	log.borrow_mut().push(mop.apply_generic(gf, &[c.clone()])?);

	add(&mop, gf, &[s.circle], leaf("circle"))?;
	log.borrow_mut().push(mop.apply_generic(gf, &[c])?);

	assert_eq!(*log.borrow(), vec![Val::from("shape"), Val::from("circle")]);
	Ok(())
}
