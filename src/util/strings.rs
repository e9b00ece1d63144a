//! Random and escaping string utilities.

use rand::distributions::Alphanumeric;
use rand::Rng;

/// Generates an alphanumeric string of the given length. Used to mint
/// collision-resistant batch ids (spec GLOSSARY, "Batch").
pub fn random_alphanum(length: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(length)
        .map(char::from)
        .collect()
}

/// Escapes `$` in a replacement value before it is substituted into a regex
/// replacement, so a translated string containing `$1`-looking user input
/// cannot be interpreted as a back-reference.
///
/// This is the one hazard spec §4.C and §9 call out by name: port it
/// verbatim, it is covered by a property test over arbitrary strings.
pub fn escape_replacement_dollars(value: &str) -> String {
    value.replace('$', "$$")
}

#[cfg(test)]
mod test {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn escaping_doubles_every_dollar_and_nothing_else(s in ".*") {
            let escaped = escape_replacement_dollars(&s);
            prop_assert_eq!(escaped.matches('$').count(), s.matches('$').count() * 2);
            prop_assert_eq!(escaped.chars().filter(|c| *c != '$').count(), s.chars().filter(|c| *c != '$').count());
        }
    }
}
