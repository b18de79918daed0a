//! Local interrupt masking.
//!
//! On bare-metal `x86_64` this is `cli`/`sti` driven by the `IF` bit of
//! `RFLAGS`. Everywhere else (host tests) there are no interrupts to mask
//! and the guard only tracks its state.

/// `RFLAGS.IF`, interrupts enabled.
const RFLAGS_IF: u64 = 1 << 9;

#[cfg(all(target_arch = "x86_64", target_os = "none"))]
mod arch {
    #[inline]
    pub fn rflags() -> u64 {
        let r: u64;
        unsafe { core::arch::asm!("pushfq; pop {}", out(reg) r, options(preserves_flags)) }
        r
    }

    #[inline]
    pub fn disable() {
        unsafe { core::arch::asm!("cli", options(nomem, nostack)) }
    }

    #[inline]
    pub fn enable() {
        unsafe { core::arch::asm!("sti", options(nomem, nostack)) }
    }
}

#[cfg(not(all(target_arch = "x86_64", target_os = "none")))]
mod arch {
    #[inline]
    pub const fn rflags() -> u64 {
        0
    }

    #[inline]
    pub const fn disable() {}

    #[inline]
    pub const fn enable() {}
}

/// Whether maskable interrupts are currently enabled on this CPU.
#[inline]
#[must_use]
pub fn interrupts_enabled() -> bool {
    arch::rflags() & RFLAGS_IF != 0
}

/// RAII guard that masks interrupts on creation and restores them on drop.
///
/// Interrupts are re-enabled on drop only if they were enabled when the
/// guard was created, so guards nest.
///
/// ```
/// use kernel_sync::IrqGuard;
///
/// let outer = IrqGuard::new();
/// {
///     let inner = IrqGuard::new();
///     assert!(!inner.were_enabled());
/// }
/// drop(outer);
/// ```
#[must_use = "interrupts are restored as soon as the guard is dropped"]
pub struct IrqGuard {
    were_enabled: bool,
}

impl IrqGuard {
    #[inline]
    pub fn new() -> Self {
        let were_enabled = interrupts_enabled();
        if were_enabled {
            arch::disable();
        }
        Self { were_enabled }
    }

    /// Interrupt state found when the guard was created.
    #[inline]
    #[must_use]
    pub const fn were_enabled(&self) -> bool {
        self.were_enabled
    }
}

impl Default for IrqGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for IrqGuard {
    fn drop(&mut self) {
        if self.were_enabled {
            arch::enable();
        }
    }
}
