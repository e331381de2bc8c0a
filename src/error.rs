use std::error::{Error};
use std::fmt::{self, Debug, Display, Formatter};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/**
The category of a [`MopError`](struct.MopError.html).

Every failure surfaced by this crate carries exactly one `ErrorKind`, so that the hosting
evaluator can route it to the matching user-visible condition without parsing messages.
*/

#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ErrorKind {
	///No class precedence list exists for the requested superclass ordering.
	InconsistentHierarchy,

	///A fixed-offset slot was read before it was ever written.
	UnboundSlot,

	///The instance's class has no slot with the requested name.
	NoSuchSlot,

	///A slot without a setter was written.
	Unsettable,

	///A cached slot accessor no longer matches the instance's class layout.
	StaleAccessor,

	///A generic function was invoked with no applicable method.
	NoApplicableMethod,

	///A method invoked its next method when none remained.
	NoNextMethod,

	///The class is immutable and can't be redefined.
	RedefinitionNotAllowed,

	///Another redefinition of the same class has been started but not committed.
	RedefinitionInProgress,

	///A handle, index, size or definition was rejected.
	InvalidArgument,

	///An error raised by user-level code invoked through a callback.
	User
}

impl ErrorKind {
	///Returns a short, human-readable description of this kind of error.
	pub fn description(&self) -> &'static str {
		match *self {
			ErrorKind::InconsistentHierarchy => "inconsistent class hierarchy",
			ErrorKind::UnboundSlot => "unbound slot",
			ErrorKind::NoSuchSlot => "no such slot",
			ErrorKind::Unsettable => "unsettable slot",
			ErrorKind::StaleAccessor => "stale slot accessor",
			ErrorKind::NoApplicableMethod => "no applicable method",
			ErrorKind::NoNextMethod => "no next method",
			ErrorKind::RedefinitionNotAllowed => "redefinition not allowed",
			ErrorKind::RedefinitionInProgress => "redefinition in progress",
			ErrorKind::InvalidArgument => "invalid argument",
			ErrorKind::User => "error"
		}
	}
}

/**
The error type returned by every fallible operation in this crate.

Errors raised by callbacks (virtual slot procedures, init-thunks and method bodies) are
passed through to the caller unchanged.
*/

#[derive(Clone)]
pub struct MopError {
	kind: ErrorKind,
	message: String
}

impl MopError {
	pub fn new<S: Into<String>>(kind: ErrorKind, message: S) -> MopError {
		MopError {
			kind,
			message: message.into()
		}
	}

	///Constructs an `ErrorKind::User` error. Intended for use by callbacks.
	pub fn user<S: Into<String>>(message: S) -> MopError {
		MopError::new(ErrorKind::User, message)
	}

	pub fn kind(&self) -> ErrorKind {
		self.kind
	}

	pub fn message(&self) -> &str {
		&self.message
	}

	///Returns `true` if this error belongs to the given category.
	pub fn is(&self, kind: ErrorKind) -> bool {
		self.kind == kind
	}
}

impl Display for MopError {
	fn fmt(&self, f: &mut Formatter) -> fmt::Result {
		if self.kind == ErrorKind::User {
			write!(f, "{}", self.message)
		} else {
			write!(f, "{}: {}", self.kind.description(), self.message)
		}
	}
}

impl Debug for MopError {
	fn fmt(&self, f: &mut Formatter) -> fmt::Result {
		write!(f, "MopError({:?}, {:?})", self.kind, self.message)
	}
}

impl Error for MopError { }

///The result type returned by every fallible operation in this crate.
pub type MopResult<T> = Result<T, MopError>;

/**
Constructs a [`MopError`](struct.MopError.html) from an
[`ErrorKind`](enum.ErrorKind.html) variant name and a format string.

```ignore
let err = error!(NoSuchSlot, "no slot named '{}'", name);
```
*/

#[macro_export]
macro_rules! error {
	($kind:ident, $($arg:tt)+) => (
		$crate::MopError::new($crate::ErrorKind::$kind, format!($($arg)+))
	);
}

/**
Returns early with a [`MopError`](struct.MopError.html).

```ignore
bail!(Unsettable, "slot '{}' is read-only", name)
```
*/

#[macro_export]
macro_rules! bail {
	($kind:ident, $($arg:tt)+) => (
		return Err($crate::error!($kind, $($arg)+))
	);
}

/**
Returns early with a [`MopError`](struct.MopError.html) if a condition is `false`.

```ignore
ensure!(index < len, InvalidArgument, "slot index {} out of range", index)
```
*/

#[macro_export]
macro_rules! ensure {
	($cond:expr, $kind:ident, $($arg:tt)+) => (
		if !$cond {
			$crate::bail!($kind, $($arg)+)
		}
	);
}
