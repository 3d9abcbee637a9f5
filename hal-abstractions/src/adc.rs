//! Analog conversion trigger
//!
//! The conversion itself completes asynchronously; the implementation hands
//! raw codes to the completion handler from its own (interrupt) context.

/// Starts one multi-channel conversion sequence
pub trait AdcTrigger {
    fn start_conversion(&mut self);
}
