//! Host and account lookups.

use std::{ffi::CStr, path::PathBuf};

/// Host name truncated at the first dot, as batch schedulers list nodes.
pub fn short_hostname() -> Option<String> {
    let raw = hostname::get().ok()?;
    let name = raw.to_str()?;
    name.split('.').next().map(str::to_string)
}

#[inline]
pub fn current_uid() -> u32 {
    // SAFETY: getuid has no preconditions and cannot fail.
    unsafe { libc::getuid() }
}

/// Returns `true` when running as the superuser.
#[inline]
pub fn is_privileged() -> bool {
    current_uid() == 0
}

/// Account name and home directory of `uid`.
pub fn account(uid: u32) -> Option<(String, PathBuf)> {
    let mut buf = vec![0 as libc::c_char; 16 * 1024];
    // SAFETY: passwd is plain old data, getpwuid_r fills it in.
    let mut pwd: libc::passwd = unsafe { std::mem::zeroed() };
    let mut found: *mut libc::passwd = std::ptr::null_mut();

    // SAFETY: every pointer refers to live, correctly sized storage.
    let rc = unsafe { libc::getpwuid_r(uid, &mut pwd, buf.as_mut_ptr(), buf.len(), &mut found) };
    if rc != 0 || found.is_null() {
        return None;
    }

    // SAFETY: on success both fields point to NUL-terminated strings in `buf`.
    let (name, dir) = unsafe { (CStr::from_ptr(pwd.pw_name), CStr::from_ptr(pwd.pw_dir)) };
    Some((
        name.to_string_lossy().into_owned(),
        PathBuf::from(dir.to_string_lossy().into_owned()),
    ))
}

pub fn user_name(uid: u32) -> Option<String> {
    account(uid).map(|(name, _)| name)
}

/// Home directory of the current account, falling back to `$HOME`.
pub fn home_dir() -> Option<PathBuf> {
    account(current_uid())
        .map(|(_, dir)| dir)
        .or_else(|| std::env::var_os("HOME").map(PathBuf::from))
}
