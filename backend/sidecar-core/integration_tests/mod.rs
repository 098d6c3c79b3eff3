mod helpers;
mod kms;
mod listener;
mod sidecar;
