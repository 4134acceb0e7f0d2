//! Canned fallback lines for language-model failure.
//!
//! When generation errors out, the user still hears a short spoken
//! acknowledgement instead of dead air; the real error goes to the logs.
//! Lines rotate so repeated failures do not sound like a broken record.

use std::sync::atomic::{AtomicUsize, Ordering};

/// Short spoken lines used when the language model is unavailable.
const FALLBACK_LINES: &[&str] = &[
    "Sorry, I lost my train of thought. Could you say that again?",
    "I didn't quite get that together. Mind repeating it?",
    "Something went wrong on my end. Please try once more.",
];

static NEXT_LINE: AtomicUsize = AtomicUsize::new(0);

/// Pick the next fallback line.
pub fn next_fallback_line() -> &'static str {
    let index = NEXT_LINE.fetch_add(1, Ordering::Relaxed);
    FALLBACK_LINES[index % FALLBACK_LINES.len()]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lines_rotate_and_never_repeat_consecutively() {
        let first = next_fallback_line();
        let second = next_fallback_line();
        assert_ne!(first, second);
    }

    #[test]
    fn lines_are_short_enough_to_speak() {
        for line in FALLBACK_LINES {
            assert!(!line.is_empty());
            assert!(line.len() < 120);
        }
    }
}
