mod envelope;
mod keep_alive;
mod pending;
mod retry;
