use mop_engine::{ClassDef, ErrorKind, Mop, MopError, MopResult, Obj, Proc, SlotDef, Storage, Val};
use std::cell::{Cell};
use std::rc::{Rc};

fn point_class(mop: &Mop) -> MopResult<mop_engine::ClassId> {
	mop.define_class(
		ClassDef::new("<point>")
			.slot(SlotDef::instance("x").init_keyword("x"))
			.slot(SlotDef::instance("y").init_keyword("y").init_value(0))
	)
}

// basic reads and writes

#[test]
fn set_then_ref() -> MopResult<()> {
	let mop = Mop::new();
	let point = point_class(&mop)?;
	let p = mop.make_instance(point, &[])?;

	mop.slot_set(&p, "x", 7)?;
	assert_eq!(mop.slot_ref(&p, "x")?, Val::Int(7));

	mop.slot_set(&p, "x", "seven")?;
	assert_eq!(mop.slot_ref(&p, "x")?, Val::from("seven"));
	Ok(())
}

#[test]
fn unwritten_slot_is_unbound() -> MopResult<()> {
	let mop = Mop::new();
	let point = point_class(&mop)?;
	let p = mop.make_instance(point, &[])?;

	assert!(!mop.slot_bound(&p, "x")?);
	assert_eq!(mop.slot_ref(&p, "x").unwrap_err().kind(), ErrorKind::UnboundSlot);
	assert!(mop.slot_bound(&p, "y")?);
	Ok(())
}

#[test]
fn keyword_beats_init_value() -> MopResult<()> {
	let mop = Mop::new();
	let point = point_class(&mop)?;

	let p = mop.make_instance(point, &[("x", Val::Int(1)), ("y", Val::Int(2))])?;
	assert_eq!(mop.slot_ref(&p, "x")?, Val::Int(1));
	assert_eq!(mop.slot_ref(&p, "y")?, Val::Int(2));

	let q = mop.make_instance(point, &[("z", Val::Int(3))])?;
	assert_eq!(mop.slot_ref(&q, "y")?, Val::Int(0));
	Ok(())
}

#[test]
fn init_thunk_runs_once_per_instance() -> MopResult<()> {
	let mop = Mop::new();
	let counter = Rc::new(Cell::new(0));

	let counter2 = Rc::clone(&counter);
	let thunk = Proc::named("next-serial", move |_, _| {
		counter2.set(counter2.get() + 1);
		Ok(Val::Int(counter2.get()))
	});

	let class = mop.define_class(
		ClassDef::new("<ticket>")
			.slot(SlotDef::instance("serial").init_keyword("serial").init_thunk(thunk))
	)?;

	let t1 = mop.make_instance(class, &[])?;
	let t2 = mop.make_instance(class, &[])?;
	let t3 = mop.make_instance(class, &[("serial", Val::Int(100))])?;

	assert_eq!(mop.slot_ref(&t1, "serial")?, Val::Int(1));
	assert_eq!(mop.slot_ref(&t2, "serial")?, Val::Int(2));
	assert_eq!(mop.slot_ref(&t3, "serial")?, Val::Int(100));
	assert_eq!(counter.get(), 2);
	Ok(())
}

#[test]
fn non_initializable_slot_ignores_keyword() -> MopResult<()> {
	let mop = Mop::new();
	let class = mop.define_class(
		ClassDef::new("<account>")
			.slot(SlotDef::instance("balance").init_keyword("balance").init_value(0)
			                                  .initializable(false))
	)?;

	let acct = mop.make_instance(class, &[("balance", Val::Int(1_000_000))])?;
	assert_eq!(mop.slot_ref(&acct, "balance")?, Val::Int(0));
	Ok(())
}

#[test]
fn subclass_overrides_slot_definition() -> MopResult<()> {
	let mop = Mop::new();
	let point = point_class(&mop)?;
	let point3 = mop.define_class(
		ClassDef::new("<point3>")
			.superclass(point)
			.slot(SlotDef::instance("y").init_value(5))
			.slot(SlotDef::instance("z").init_value(9))
	)?;

	let names: Vec<String> = mop.class_slots(point3)?.iter()
		.map(|acc| acc.name().to_string())
		.collect();
	assert_eq!(names, vec!["x", "y", "z"]);

	let p = mop.make_instance(point3, &[("y", Val::Int(1))])?;
	assert_eq!(mop.slot_ref(&p, "y")?, Val::Int(5));
	assert_eq!(mop.slot_ref(&p, "z")?, Val::Int(9));
	assert_eq!(mop.class_core_size(point3)?, 3);
	Ok(())
}

// computed slots

#[test]
fn virtual_slot_calls_procedures() -> MopResult<()> {
	let mop = Mop::new();

	let getter = Proc::new(|mop, args| {
		let obj = args[0].clone().unwrap_obj();
		match mop.slot_ref(&obj, "cents")? {
			Val::Int(cents) => Ok(Val::Flo(cents as f64 / 100.0)),
			other => Err(MopError::user(format!("bad cents: {:?}", other)))
		}
	});

	let setter = Proc::new(|mop, args| {
		let obj = args[0].clone().unwrap_obj();
		match args[1] {
			Val::Flo(dollars) => mop.slot_set(&obj, "cents", (dollars * 100.0).round() as i64)?,
			_ => return Err(MopError::user("dollars must be a flo"))
		}

		Ok(Val::Nil)
	});

	let class = mop.define_class(
		ClassDef::new("<price>")
			.slot(SlotDef::instance("cents").init_value(250))
			.slot(SlotDef::virtual_slot("dollars", getter, Some(setter)))
	)?;

	let price = mop.make_instance(class, &[])?;
	assert_eq!(mop.slot_ref(&price, "dollars")?, Val::Flo(2.5));

	mop.slot_set(&price, "dollars", 4.0)?;
	assert_eq!(mop.slot_ref(&price, "cents")?, Val::Int(400));

	let err = mop.slot_set(&price, "dollars", "lots").unwrap_err();
	assert_eq!(err.kind(), ErrorKind::User);
	assert_eq!(err.message(), "dollars must be a flo");

	//only the fixed slot takes a word
	assert_eq!(mop.class_core_size(class)?, 1);
	Ok(())
}

#[test]
fn read_only_virtual_slot_is_unsettable() -> MopResult<()> {
	let mop = Mop::new();
	let class = mop.define_class(
		ClassDef::new("<constant>")
			.slot(SlotDef::virtual_slot("answer", Proc::new(|_, _| Ok(Val::Int(42))), None))
	)?;

	let obj = mop.make_instance(class, &[])?;
	assert_eq!(mop.slot_ref(&obj, "answer")?, Val::Int(42));
	assert!(mop.slot_bound(&obj, "answer")?);

	let err = mop.slot_set(&obj, "answer", 0).unwrap_err();
	assert_eq!(err.kind(), ErrorKind::Unsettable);
	Ok(())
}

fn native_len(mop: &Mop, obj: &Obj) -> MopResult<Val> {
	let first = mop.class_core_size(obj.class())? - 1;
	mop.instance_slot_ref(obj, first)
}

fn native_set_len(mop: &Mop, obj: &Obj, val: Val) -> MopResult<()> {
	let first = mop.class_core_size(obj.class())? - 1;
	mop.instance_slot_set(obj, first, val)
}

#[test]
fn native_slot_uses_host_functions() -> MopResult<()> {
	let mop = Mop::new();
	let class = mop.define_class(
		ClassDef::new("<buffer>")
			.native_words(1)
			.slot(SlotDef::instance("label").init_value("buf"))
			.slot(SlotDef::native("len", native_len, Some(native_set_len)).init_value(0))
	)?;

	assert_eq!(mop.class_core_size(class)?, 2);

	let buf = mop.make_instance(class, &[])?;
	assert_eq!(mop.slot_ref(&buf, "len")?, Val::Int(0));

	mop.slot_set(&buf, "len", 16)?;
	assert_eq!(mop.instance_slot_ref(&buf, 1)?, Val::Int(16));

	let accessor = mop.resolve_accessor(&buf, "len")?;
	assert!(matches!(accessor.storage(), Storage::Native { .. }));
	assert_eq!(accessor.slot_number(), None);
	Ok(())
}

// edge and error cases

#[test]
fn missing_slot_is_reported() -> MopResult<()> {
	let mop = Mop::new();
	let point = point_class(&mop)?;
	let p = mop.make_instance(point, &[])?;

	assert_eq!(mop.slot_ref(&p, "w").unwrap_err().kind(), ErrorKind::NoSuchSlot);
	assert_eq!(mop.slot_set(&p, "w", 1).unwrap_err().kind(), ErrorKind::NoSuchSlot);
	assert_eq!(mop.resolve_accessor(&p, "w").unwrap_err().kind(), ErrorKind::NoSuchSlot);
	Ok(())
}

#[test]
fn accessor_reflection() -> MopResult<()> {
	let mop = Mop::new();
	let point = point_class(&mop)?;
	let p = mop.make_instance(point, &[("x", Val::Int(3))])?;

	let y = mop.resolve_accessor(&p, "y")?;
	assert_eq!(y.name().name(), "y");
	assert_eq!(y.class(), point);
	assert_eq!(y.slot_number(), Some(1));
	assert_eq!(y.init_value(), Some(Val::Int(0)));
	assert!(y.is_settable());
	assert!(y.is_initializable());

	mop.slot_set_using_accessor(&p, &y, Val::Int(8))?;
	assert_eq!(mop.slot_ref_using_accessor(&p, &y)?, Val::Int(8));
	assert!(mop.slot_bound_using_accessor(&p, &y)?);
	Ok(())
}

#[test]
fn direct_word_access() -> MopResult<()> {
	let mop = Mop::new();
	let point = point_class(&mop)?;
	let p = mop.make_instance(point, &[("x", Val::Int(3))])?;

	assert_eq!(mop.instance_slot_ref(&p, 0)?, Val::Int(3));
	mop.instance_slot_set(&p, 1, Val::Int(4))?;
	assert_eq!(mop.slot_ref(&p, "y")?, Val::Int(4));

	assert_eq!(mop.instance_slot_ref(&p, 2).unwrap_err().kind(), ErrorKind::InvalidArgument);
	assert_eq!(mop.instance_slot_set(&p, 9, 0).unwrap_err().kind(), ErrorKind::InvalidArgument);
	Ok(())
}

#[test]
fn allocation_checks_core_size() -> MopResult<()> {
	let mop = Mop::new();
	let point = point_class(&mop)?;

	let err = mop.allocate_instance(point, 1).unwrap_err();
	assert_eq!(err.kind(), ErrorKind::InvalidArgument);

	let big = mop.allocate_instance(point, 4)?;
	assert_eq!(big.core_size(), 4);
	assert!(!mop.slot_bound(&big, "y")?);

	mop.instance_slot_set(&big, 3, Val::Bool(true))?;
	assert_eq!(mop.instance_slot_ref(&big, 3)?, Val::Bool(true));

	let integer = mop.builtins().integer;
	let err = mop.allocate_instance(integer, 0).unwrap_err();
	assert_eq!(err.kind(), ErrorKind::InvalidArgument);
	Ok(())
}

#[test]
fn class_of_values() -> MopResult<()> {
	let mop = Mop::new();
	let b = *mop.builtins();
	let point = point_class(&mop)?;
	let p = mop.make_instance(point, &[])?;

	assert_eq!(mop.class_of(&Val::Int(1)), b.integer);
	assert_eq!(mop.class_of(&Val::Flo(1.5)), b.real);
	assert_eq!(mop.class_of(&Val::Nil), b.null);
	assert_eq!(mop.class_of(&Val::Class(point)), b.class);
	assert_eq!(mop.class_of(&Val::Obj(p.clone())), point);

	assert!(mop.is_a(&Val::Int(1), b.number)?);
	assert!(mop.is_a(&Val::Obj(p), b.object)?);
	assert!(!mop.is_a(&Val::from("s"), b.object)?);
	Ok(())
}
