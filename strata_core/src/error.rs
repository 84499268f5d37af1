// Copyright 2026 the Strata Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Result codes returned by engine entry points.
//!
//! Every graph-mutating call validates its inputs before touching any state,
//! so an `Err` always means the scene graph is exactly as it was before the
//! call.

use thiserror::Error;

/// Errors returned by [`Engine`](crate::engine::Engine) operations.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq, Hash)]
pub enum EngineError {
    /// The handle is stale, reserved, or refers to an object that cannot be
    /// used for this operation (e.g. deleting World).
    #[error("no such object")]
    NoSuchObject,
    /// A backing resource (store, image, output) was unusable.
    #[error("bad resource")]
    BadResource,
    /// An argument was out of range or referred to the wrong kind of object.
    #[error("bad argument")]
    BadArgument,
    /// A bounded pool (object slab, rendertarget list, context stack) is full.
    #[error("out of space")]
    OutOfSpace,
    /// The operation is invalid for the object's current role or state.
    #[error("operation not accepted in current state")]
    UnacceptedState,
    /// The link would create a cycle, or involves a clone or persistent object.
    #[error("clone permission denied")]
    ClonePermission,
    /// The platform could not provide a usable display mode.
    #[error("bad video mode")]
    BadVideoMode,
}

/// Convenience alias for results with [`EngineError`].
pub type Result<T> = core::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages_are_stable() {
        assert_eq!(EngineError::NoSuchObject.to_string(), "no such object");
        assert_eq!(
            EngineError::ClonePermission.to_string(),
            "clone permission denied"
        );
    }
}
