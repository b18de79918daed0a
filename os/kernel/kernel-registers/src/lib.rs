//! # Typed `X86_64` Paging Registers
//!
//! The two pieces of hardware state the virtual memory manager touches:
//!
//! * [`Cr3`](cr3::Cr3), the root of the active page-table hierarchy, and
//! * the TLB, invalidated one page at a time with [`invlpg`](tlb::invlpg).
//!
//! The register layout is plain data and usable anywhere; the instructions
//! that write CR3 and flush the TLB are only compiled with the `asm` feature
//! on `x86_64` and require ring 0.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

pub mod cr3;
pub mod tlb;

pub use cr3::Cr3;

pub trait StoreRegisterUnsafe {
    /// # Safety
    /// The caller must uphold the implementation-specific safety requirements.
    /// Writing a paging register changes the meaning of every pointer.
    unsafe fn store_unsafe(self);
}
