//! Result reduction
//!
//! Folds the result codes of every pair in a run into the harness's own exit
//! code. The run passes only if every pair passed; otherwise the first failing
//! pair's code (in run order) is reported.

/// Reduce pair results into one code. An empty run passes.
pub fn reduce<I>(codes: I) -> i32
where
    I: IntoIterator<Item = i32>,
{
    codes.into_iter().find(|code| *code != 0).unwrap_or(0)
}

/// Map a result code onto a process exit byte without letting a failure
/// wrap around to success.
pub fn exit_code(code: i32) -> u8 {
    if code == 0 {
        return 0;
    }
    match (code & 0xff) as u8 {
        0 => 1,
        byte => byte,
    }
}
