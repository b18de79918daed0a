//! # Kernel Configuration and Boot Interface
//!
//! The authoritative source for the numbers the boot linkage, the physical
//! frame allocator and the virtual memory manager must agree on.
//!
//! ## Modules
//!
//! ### Boot Information ([`boot`])
//! The record the assembly entry code passes to the memory bring-up: where
//! the multiboot2 information lives and where the kernel image ends.
//!
//! ### Memory Layout ([`memory`])
//! Page size, the tracked physical range, the fixed frame bitmap location,
//! the reserved low-memory floor and the higher-half link offset.
//!
//! ## Physical Memory Layout
//!
//! ```text
//! 0x0000_0000 ┌─────────────────────────────────┐
//!             │  Low Memory, firmware, loader   │  always reserved
//! PHYS_LOAD   ├─────────────────────────────────┤ 0x0010_0000 (1 MiB)
//!             │       Kernel Image              │
//! FLOOR       ├─────────────────────────────────┤ 0x0020_0000 (2 MiB, or kernel end)
//!             │       Allocatable RAM           │
//! BITMAP      ├─────────────────────────────────┤ 0x0100_0000 (16 MiB)
//!             │   Frame bitmap (128 KiB)        │  always reserved
//!             ├─────────────────────────────────┤
//!             │       Allocatable RAM           │
//! BOOT_WINDOW ├─────────────────────────────────┤ 0x0800_0000 (128 MiB)
//!             │  RAM outside the boot window    │
//!             └─────────────────────────────────┘
//! ```
//!
//! ## Virtual Memory Layout
//!
//! ```text
//! 0x0000_0000_0000_0000 ┌──────────────────────────────┐
//!                       │ Identity map of boot window  │
//! 0x0000_0000_0800_0000 ├──────────────────────────────┤
//!                       │          (unmapped)          │
//! KERNEL_BASE           ├──────────────────────────────┤ 0xffff_ffff_8000_0000
//!                       │ Boot window at KERNEL_BASE+pa│
//!                       └──────────────────────────────┘
//! ```
//!
//! The constants are validated at compile time; the [`MemoryLayout`](memory::MemoryLayout)
//! struct carries them into the allocators at runtime.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![deny(unsafe_code)]

pub mod boot;
pub mod memory;
