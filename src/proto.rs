// Generated from proto/order_service.proto by build.rs
tonic::include_proto!("orderservice");
