/*! Integration tests for Orda.
 *
 * This test suite is organized as a single integration test binary
 * following the pattern described by matklad in
 * https://matklad.github.io/2021/02/27/delete-cargo-integration-tests.html
 *
 * The module structure mirrors the main library structure:
 * - crdt: Convergence of the snapshot engines under concurrent operations
 * - datatypes: Transactions and rollback through the datatype façades
 * - sync: Clients syncing through an in-process server
 * - server: Push-pull handling as seen on the wire
 */

use tracing_subscriber::EnvFilter;

#[ctor::ctor]
fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("orda=info".parse().unwrap()))
        .with_test_writer()
        .try_init();
}

mod crdt;
mod datatypes;
mod helpers;
mod server;
mod sync;
