//! gRPC types for the `object.Fetcher` service.
//!
//! Generated from `proto/fetcher.proto` by `tools/proto_build`; rerun it after
//! editing the schema.

include!("../proto/gen/object.rs");
