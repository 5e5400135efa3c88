// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! OS user impersonation seam.
//!
//! The assistant must run as the submitting OS user. The production
//! implementation prefixes the command with a non-interactive `sudo -u`
//! (the service identity needs a matching sudoers rule); tests substitute
//! [`NoopImpersonator`] to run in-process as the current user.

use bx_core::Error;

/// Lowest UID considered a regular (non-system) account.
const MIN_USER_UID: u32 = 1000;

/// Rewrites a command line so it executes as the given OS user.
pub trait Impersonator: Send + Sync {
    /// Return the (program, args) to run `program args...` as `user`.
    fn wrap(
        &self,
        user: &str,
        program: &str,
        args: &[String],
    ) -> Result<(String, Vec<String>), Error>;
}

/// Privileged-helper impersonation via `sudo -n -u <user> --`.
///
/// Refuses system accounts (UID below 1000) and unknown users.
pub struct SudoImpersonator;

impl Impersonator for SudoImpersonator {
    fn wrap(
        &self,
        user: &str,
        program: &str,
        args: &[String],
    ) -> Result<(String, Vec<String>), Error> {
        let uid = resolve_uid(user)?;
        if uid < MIN_USER_UID {
            return Err(Error::AccessDenied(format!(
                "refusing to impersonate system account {user} (uid {uid})"
            )));
        }
        let mut wrapped = vec![
            "-n".to_string(),
            "-u".to_string(),
            user.to_string(),
            "--".to_string(),
            program.to_string(),
        ];
        wrapped.extend_from_slice(args);
        Ok(("sudo".to_string(), wrapped))
    }
}

fn resolve_uid(user: &str) -> Result<u32, Error> {
    match nix::unistd::User::from_name(user) {
        Ok(Some(entry)) => Ok(entry.uid.as_raw()),
        Ok(None) => Err(Error::AccessDenied(format!("unknown user {user}"))),
        Err(e) => Err(Error::Internal(format!("user lookup for {user} failed: {e}"))),
    }
}

/// Identity impersonator: runs the command as the service user.
///
/// Used by tests and single-user deployments without a sudoers rule.
pub struct NoopImpersonator;

impl Impersonator for NoopImpersonator {
    fn wrap(
        &self,
        _user: &str,
        program: &str,
        args: &[String],
    ) -> Result<(String, Vec<String>), Error> {
        Ok((program.to_string(), args.to_vec()))
    }
}

#[cfg(test)]
#[path = "impersonate_tests.rs"]
mod tests;
