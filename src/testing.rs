//! Test assertions.

/// Assert that `$result` is an `Err` whose value matches `$pattern`.
///
/// The pattern is matched against a reference to the error, so bindings are
/// references. Panics when the result is `Ok` or the error has another shape.
///
/// ```
/// use clint_utilities::assert_err;
/// use clint_utilities::http::{RequestError, RetryPolicy};
///
/// assert_err!(RetryPolicy::new(0, 1.0), RequestError::InvalidPolicy(_));
/// assert_err!(
///     "x".parse::<u8>(),
///     e if e.kind() == &std::num::IntErrorKind::InvalidDigit
/// );
/// ```
#[macro_export]
macro_rules! assert_err {
    ($result:expr, $pattern:pat $(if $guard:expr)? $(,)?) => {
        match $result {
            ::core::result::Result::Ok(_) => ::core::panic!(
                "expected an error matching `{}`, got Ok",
                ::core::stringify!($pattern)
            ),
            ::core::result::Result::Err(err) => match &err {
                $pattern $(if $guard)? => {}
                other => ::core::panic!(
                    "expected an error matching `{}`, got {:?}",
                    ::core::stringify!($pattern),
                    other
                ),
            },
        }
    };
}
