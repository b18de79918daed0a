//! # Kernel synchronization primitives
//!
//! A test-and-test-and-set [`SpinLock`] and an interrupt guard. The memory
//! managers are shared between the boot path and interrupt handlers, so
//! their locks are taken through [`SpinLock::lock_irq`]: interrupts stay
//! masked for as long as the guard lives and the handler can never spin on
//! a lock its own CPU already holds.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

pub mod irq;
mod spin_lock;

pub use irq::IrqGuard;
pub use spin_lock::{IrqSpinLockGuard, SpinLock, SpinLockGuard};
