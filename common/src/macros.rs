//! Common macros used by the `avcmux` crates.

#[macro_export]
/// Return an [`Err`] containing `$err` as a [`Report`](crate::error::Report) with optional `$attachment`s.
///
/// The error is converted with `?`, so the enclosing function may return either a bare `Result<T, Report<E>>` or an
/// `Error<E>`.
macro_rules! bail_attach {
    ($err:expr $(, $($attachment:expr),+)? $(,)?) => {
        return Err($crate::report_attach!($err $(, $($attachment),+)?))?
    };
}

#[macro_export]
/// Ensure `$cond` is `true`, or return an [`Err`] containing `$err` as a [`Report`](crate::error::Report) with optional
/// `$attachment`s.
macro_rules! ensure_attach {
    ($cond:expr, $err:expr $(, $($attachment:expr),+)? $(,)?) => {{
        let cond: bool = $cond;
        if !cond {
            $crate::bail_attach!($err, concat!("condition failed: ", stringify!($cond)) $(, $($attachment),+)?);
        }
    }};
}

#[macro_export]
/// Create a [`Report`](crate::error::Report) contaning `$err` with optional `$attachment`s.
macro_rules! report_attach {
    ($err:expr $(, $($attachment:expr),+)? $(,)?) => {
        $crate::error::Report::from($err)
            $($(.attach_printable($attachment))+)?
    };
}
