pub(crate) mod helpers;
mod websocket;
