//! Error chain helpers
//!
//! Walk `source()` chains for reporting terminal errors.

use std::error::Error as StdError;

/// Format an error chain as a multi-line string
///
/// Each `source()` is printed on its own line, indented one step deeper
/// than its parent.
///
/// # Example
///
/// ```rust,ignore
/// use taskweave_core::error::format_error_chain;
///
/// if let Err(e) = run_workload().await {
///     eprintln!("{}", format_error_chain(&e));
/// }
/// ```
pub fn format_error_chain(error: &dyn StdError) -> String {
    let mut result = format!("Error: {}", error);
    let mut current = error.source();
    let mut level = 1;

    while let Some(source) = current {
        result.push_str(&format!(
            "\n{:indent$}Caused by: {}",
            "",
            source,
            indent = level * 2
        ));
        current = source.source();
        level += 1;
    }

    result
}

/// Get the last error in a chain
pub fn root_cause(error: &dyn StdError) -> &dyn StdError {
    let mut current = error;
    while let Some(source) = current.source() {
        current = source;
    }
    current
}

/// Number of errors in a chain (minimum 1)
pub fn error_chain_length(error: &dyn StdError) -> usize {
    let mut count = 1;
    let mut current = error.source();

    while let Some(source) = current {
        count += 1;
        current = source.source();
    }

    count
}
