//! # appwire
//!
//! Modular application container with typed dependency wiring and
//! ordered lifecycle orchestration.
//!
//! ## Features
//!
//! - **Typed wiring**: constructors declare dependencies through
//!   parameter types; the container resolves them lazily, in
//!   topological order, with memoized singletons
//! - **Cycle detection**: re-entrant dependency chains fail with the
//!   full key path instead of looping
//! - **Module scopes**: bundle options into named child scopes with
//!   local decorators, replacements, and private providers
//! - **Value groups**: many contributors under one key, consumed as a
//!   sequence or a name-keyed map
//! - **Ordered lifecycle**: start hooks run forward in resolution
//!   order, stop hooks run in reverse, and a failed start rolls back
//!   the hooks that already succeeded
//! - **Shutdown fanout**: OS signals and programmatic shutdown
//!   requests broadcast to any number of waiters with exit-code
//!   semantics
//!
//! ## Quick Start
//!
//! ```rust
//! use appwire::{invoke, provide, supply, App};
//! use std::sync::Arc;
//!
//! struct Config {
//!     greeting: String,
//! }
//!
//! struct Greeter {
//!     config: Arc<Config>,
//! }
//!
//! impl Greeter {
//!     fn greet(&self) -> String {
//!         format!("{}, world", self.config.greeting)
//!     }
//! }
//!
//! let app = App::new((
//!     supply(Config {
//!         greeting: "hello".to_string(),
//!     }),
//!     provide(|config: Arc<Config>| Greeter { config }),
//!     invoke(|greeter: Arc<Greeter>| {
//!         assert_eq!(greeter.greet(), "hello, world");
//!     }),
//! ));
//! assert!(app.err().is_none());
//! ```
//!
//! ## Lifecycle
//!
//! Producers append [`Hook`]s to the injected [`Lifecycle`] while
//! they are constructed; because construction happens in dependency
//! order, so do the hooks.
//!
//! ```rust
//! use appwire::{invoke, provide, App, Ctx, Hook, Lifecycle};
//! use std::sync::Arc;
//!
//! struct Server;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let mut app = App::new((
//!     provide(|lc: Arc<Lifecycle>| {
//!         lc.append(
//!             Hook::new()
//!                 .on_start(|_ctx| async {
//!                     // bind listeners, spawn workers…
//!                     Ok(())
//!                 })
//!                 .on_stop(|_ctx| async {
//!                     // drain and close
//!                     Ok(())
//!                 }),
//!         );
//!         Server
//!     }),
//!     invoke(|_server: Arc<Server>| {}),
//! ));
//!
//! let ctx = Ctx::new();
//! app.start(&ctx).await.unwrap();
//! app.stop(&ctx).await.unwrap();
//! # }
//! ```
//!
//! ## Modules
//!
//! ```rust
//! use appwire::{invoke, module, provide, supply, App};
//! use std::sync::Arc;
//!
//! struct Repo {
//!     url: String,
//! }
//!
//! let app = App::new((
//!     module(
//!         "storage",
//!         provide(|url: Arc<String>| Repo { url: url.to_string() }),
//!     ),
//!     supply("postgres://localhost".to_string()),
//!     invoke(|repo: Arc<Repo>| assert!(repo.url.starts_with("postgres"))),
//! ));
//! assert!(app.err().is_none());
//! ```

// Module declarations
pub mod ctx;
pub mod error;
pub mod event;
pub mod extract;
pub mod key;
pub mod lifecycle;
pub mod options;
pub mod shutdown;

mod app;
mod graph;
mod producer;

// Re-export core types
pub use app::App;
pub use ctx::{CancellationToken, Ctx};
pub use error::{ArcError, BoxError, CoreError, CoreResult, HookPhase, Origin};
pub use event::{Event, EventSink, NopSink, TracingSink};
pub use extract::{Extract, Group, GroupMap};
pub use key::{key_of, Key, Qualifier};
pub use lifecycle::{Hook, Lifecycle};
pub use options::{
    decorate, invoke, module, nop_logger, populate, provide, provide_bundle, replace,
    shutdown_timeout, start_timeout, supply, try_decorate, try_provide, try_provide_bundle,
    wire_error, with_exit, with_logger, Decorate, IntoOpts, Invoke, Opt, Provide, Slot, Supply,
};
pub use producer::{
    Bundle, IntoBundleProvider, IntoInvoke, IntoProvider, IntoSinkProducer, IntoTryBundleProvider,
    IntoTryProvider,
};
pub use shutdown::{
    exit_code, OsSignal, ShutdownOpt, ShutdownSignal, Shutdowner, SignalSource,
};
