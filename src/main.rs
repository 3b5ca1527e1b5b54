#[macro_use]
extern crate static_assertions;

// dependency free
mod secure_vec;

#[macro_use]
mod prelude;

#[macro_use]
mod fs_util;

#[macro_use]
mod util;

mod clargs;
mod config;
mod dirapi;
mod file_codec;
mod logical_path;
mod model;
mod path_codec;
mod sync_engine;
mod watch;

use crate::{
    clargs::{Opts, SyncArgs},
    dirapi::DirectoryAccess,
    model::Report,
    prelude::*,
    secure_vec::Password,
    sync_engine::{CopyDirection, SyncEngine, SyncOptions},
};
use std::{path::Path, time::Duration};
use structopt::StructOpt;

macro_rules! color {
    ( $color:ident, $fmt_str:literal $( , $arg:expr )* ) => {
        ansi_term::Colour::$color.paint(format!($fmt_str $( , $arg )*))
    };
}

fn main() {
    let opts = Opts::from_args();
    if let Err(err) = run(opts) {
        eprintln!("{}", color!(Red, "error: {}", err));
        std::process::exit(err.exit_code());
    }
}

fn run(opts: Opts) -> CsyncResult<()> {
    match opts {
        Opts::Push { sync } => run_sync(&sync, CopyDirection::Push),
        Opts::Pull { sync } => run_sync(&sync, CopyDirection::Pull),
        Opts::WatchPush { sync, settle_ms } => run_watch(&sync, CopyDirection::Push, settle_ms),
        Opts::WatchPull { sync, settle_ms } => run_watch(&sync, CopyDirection::Pull, settle_ms),
        Opts::InitPlain { dir, exclude, overwrite } => {
            config::init_plain(&dir, exclude, overwrite)?;
            println!("{}", color!(Green, "initialized plaintext sync root at {:?}", dir));
            Ok(())
        }
        Opts::InitCrypt { dir, exclude, overwrite } => {
            let password = prompt_password_confirmed("password")?;
            config::init_crypt(&dir, exclude, password, overwrite)?;
            println!("{}", color!(Green, "initialized encrypted sync root at {:?}", dir));
            Ok(())
        }
        Opts::ChangePassword { dir } => {
            let old_password = prompt_password("current password")?;
            let new_password = prompt_password_confirmed("new password")?;
            config::change_password(&dir, old_password, new_password)?;
            println!("{}", color!(Green, "password changed for {:?}", dir));
            Ok(())
        }
        Opts::RebuildMeta { dir } => {
            let password = prompt_password("password")?;
            config::rebuild_meta(&dir, password)?;
            println!("{}", color!(Green, "metadata sidecar rebuilt for {:?}", dir));
            Ok(())
        }
    }
}

fn open_pair(local_dir: &Path, remote_dir: &Path, chunk_size: u32) -> CsyncResult<(Box<dyn DirectoryAccess>, Box<dyn DirectoryAccess>)> {
    let local_password = if config::needs_password(local_dir)? { Some(prompt_password("local password")?) } else { None };
    let local = config::open(local_dir, local_password, chunk_size)?;
    if !local.is_plain() {
        return csync_err!(DirectionMismatch);
    }

    let remote_password = if config::needs_password(remote_dir)? { Some(prompt_password("remote password")?) } else { None };
    let remote = config::open(remote_dir, remote_password, chunk_size)?;

    Ok((local, remote))
}

fn run_sync(sync: &SyncArgs, direction: CopyDirection) -> CsyncResult<()> {
    let (mut local, mut remote) = open_pair(&sync.local, &sync.remote, sync.chunk_size)?;
    let options = SyncOptions {
        diffonly: sync.diffonly,
        use_ctime: sync.use_ctime,
        verbose: sync.verbose,
    };
    let mut engine = SyncEngine::new(local.as_mut(), remote.as_mut(), direction, options)?;
    let report = engine.sync()?;
    print_report(&report, sync.verbose);
    if !report.failures().is_empty() {
        return csync_err!(Other, format!("{} action(s) failed", report.failures().len()));
    }
    Ok(())
}

fn run_watch(sync: &SyncArgs, direction: CopyDirection, settle_ms: u64) -> CsyncResult<()> {
    let (mut local, mut remote) = open_pair(&sync.local, &sync.remote, sync.chunk_size)?;
    let options = SyncOptions {
        diffonly: sync.diffonly,
        use_ctime: sync.use_ctime,
        verbose: sync.verbose,
    };
    let verbose = sync.verbose;
    match watch::watch(local.as_mut(), remote.as_mut(), direction, Duration::from_millis(settle_ms), options, |report| print_report(report, verbose)) {
        Ok(never) => match never {},
        Err(err) => Err(err),
    }
}

fn print_report(report: &Report, verbose: bool) {
    print!("{}", report.render(verbose));
}

fn prompt_password(prompt: &str) -> CsyncResult<Password> {
    let raw = rpassword::prompt_password(format!("{}: ", prompt))?;
    Ok(Password::from(raw))
}

/// Prompts twice and requires the two entries to match, for the cases where a
/// typo would be expensive to discover later (setting a new password).
fn prompt_password_confirmed(prompt: &str) -> CsyncResult<Password> {
    let first = rpassword::prompt_password(format!("{}: ", prompt))?;
    let second = rpassword::prompt_password(format!("confirm {}: ", prompt))?;
    if first != second {
        return csync_err!(PasswordConfirmationFailed);
    }
    Ok(Password::from(first))
}
