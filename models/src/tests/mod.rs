mod batch;
mod event;
