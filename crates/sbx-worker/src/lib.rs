//! In-sandbox dispatcher: reads framed host messages from stdin, spawns one
//! child process per execution id, and streams its stdout/stderr back
//! framed and id-tagged over stdout.

mod dispatcher;

pub use dispatcher::run;
