// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Declarative macros shared across the workspace.
//!
//! - [`simple_display!`] — map enum variants to their wire labels
//! - [`builder!`] — test-only builder for a struct with sensible defaults
//! - [`setters!`] — chainable setters inside an existing `impl` block
//!
//! Field groups mean the same thing in [`builder!`] and [`setters!`]:
//! `into` setters take `impl Into<T>`, `set` setters take `T` as-is,
//! `option` setters wrap the value in `Some`, and `computed` fields
//! (builder only) are evaluated fresh at `build()`.

/// Generate a `Display` impl mapping each variant to a string label.
///
/// Unit variants match directly; variants with payloads use `(..)`.
/// Status enums use this so log lines and persisted records agree on
/// one spelling:
///
/// ```ignore
/// crate::simple_display! {
///     MessageStatus {
///         Queued => "queued",
///         Completed => "completed",
///         Error => "error",
///     }
/// }
/// ```
#[macro_export]
macro_rules! simple_display {
    ($ty:ty { $( $variant:ident $(( $($payload:tt)* ))? => $label:expr ),+ $(,)? }) => {
        impl std::fmt::Display for $ty {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(match self {
                    $( Self::$variant $(( $($payload)* ))? => $label, )+
                })
            }
        }
    };
}

/// Generate a test builder: the builder struct, a `Default` impl
/// carrying the per-field defaults, setters, and `build()`.
///
/// Everything is gated behind `#[cfg(any(test, feature =
/// "test-support"))]` so production builds carry none of it. This is
/// how `Message::builder()` exists for tests without a builder type in
/// the shipped API:
///
/// ```ignore
/// crate::builder! {
///     pub struct MessageBuilder => Message {
///         into {
///             correlation_id: String = "corr-1",
///             raw: Bytes = Bytes::from_static(b"MSH|..."),
///         }
///         set {
///             sequence_num: u32 = 1,
///             status: MessageStatus = MessageStatus::Created,
///         }
///         option {
///             message_type: String = None,
///         }
///         computed {
///             id: MessageId = MessageId::new(),
///         }
///     }
/// }
/// ```
#[macro_export]
macro_rules! builder {
    (
        pub struct $builder:ident => $target:ident {
            $(into {
                $( $ifield:ident : $ity:ty = $idefault:expr ),* $(,)?
            })?
            $(set {
                $( $sfield:ident : $sty:ty = $sdefault:expr ),* $(,)?
            })?
            $(option {
                $( $ofield:ident : $oty:ty = $odefault:expr ),* $(,)?
            })?
            $(computed {
                $( $cfield:ident : $cty:ty = $cexpr:expr ),* $(,)?
            })?
        }
    ) => {
        #[cfg(any(test, feature = "test-support"))]
        pub struct $builder {
            $($( $ifield: $ity, )*)?
            $($( $sfield: $sty, )*)?
            $($( $ofield: Option<$oty>, )*)?
        }

        #[cfg(any(test, feature = "test-support"))]
        impl Default for $builder {
            fn default() -> Self {
                Self {
                    $($( $ifield: $idefault.into(), )*)?
                    $($( $sfield: $sdefault, )*)?
                    $($( $ofield: $odefault, )*)?
                }
            }
        }

        #[cfg(any(test, feature = "test-support"))]
        impl $builder {
            $($(
                pub fn $ifield(mut self, v: impl Into<$ity>) -> Self {
                    self.$ifield = v.into();
                    self
                }
            )*)?

            $($(
                pub fn $sfield(mut self, v: $sty) -> Self {
                    self.$sfield = v;
                    self
                }
            )*)?

            $($(
                pub fn $ofield(mut self, v: impl Into<$oty>) -> Self {
                    self.$ofield = Some(v.into());
                    self
                }
            )*)?

            pub fn build(self) -> $target {
                $target {
                    $($( $ifield: self.$ifield, )*)?
                    $($( $sfield: self.$sfield, )*)?
                    $($( $ofield: self.$ofield, )*)?
                    $($( $cfield: $cexpr, )*)?
                }
            }
        }

        #[cfg(any(test, feature = "test-support"))]
        impl $target {
            /// Create a builder with test defaults.
            pub fn builder() -> $builder {
                $builder::default()
            }
        }
    };
}

/// Generate chainable setters inside an existing `impl` block, for
/// production config types that are built up in place:
///
/// ```ignore
/// impl WalConfig {
///     mw_core::setters! {
///         set {
///             sync_mode: SyncMode,
///             max_retries: u32,
///         }
///     }
/// }
/// ```
#[macro_export]
macro_rules! setters {
    (
        $(into {
            $( $ifield:ident : $ity:ty ),* $(,)?
        })?
        $(set {
            $( $sfield:ident : $sty:ty ),* $(,)?
        })?
        $(option {
            $( $ofield:ident : $oty:ty ),* $(,)?
        })?
    ) => {
        $($(
            pub fn $ifield(mut self, v: impl Into<$ity>) -> Self {
                self.$ifield = v.into();
                self
            }
        )*)?

        $($(
            pub fn $sfield(mut self, v: $sty) -> Self {
                self.$sfield = v;
                self
            }
        )*)?

        $($(
            pub fn $ofield(mut self, v: impl Into<$oty>) -> Self {
                self.$ofield = Some(v.into());
                self
            }
        )*)?
    };
}
