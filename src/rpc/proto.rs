//! Vendored module generated from `proto/fleet.proto` (server only).
// This file is @generated by prost-build.
#![allow(missing_docs)]

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct FleetSnapshotRequest {
    #[prost(string, repeated, tag = "1")]
    pub vehicle_ids: ::prost::alloc::vec::Vec<::prost::alloc::string::String>,
    #[prost(bool, tag = "2")]
    pub include_metrics: bool,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct VehicleState {
    #[prost(string, tag = "1")]
    pub vehicle_id: ::prost::alloc::string::String,
    #[prost(double, tag = "2")]
    pub lat: f64,
    #[prost(double, tag = "3")]
    pub lng: f64,
    #[prost(string, tag = "4")]
    pub recorded_at: ::prost::alloc::string::String,
    #[prost(double, tag = "5")]
    pub speed_kmh: f64,
    #[prost(double, tag = "6")]
    pub fuel_level: f64,
    #[prost(string, tag = "7")]
    pub engine_status: ::prost::alloc::string::String,
    #[prost(string, tag = "8")]
    pub last_seen: ::prost::alloc::string::String,
}
#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct FleetMetrics {
    #[prost(uint64, tag = "1")]
    pub total_messages: u64,
    #[prost(uint64, tag = "2")]
    pub invalid_messages: u64,
    #[prost(uint64, tag = "3")]
    pub vehicles_tracked: u64,
    #[prost(uint64, tag = "4")]
    pub connected_clients: u64,
    #[prost(double, tag = "5")]
    pub message_rate_per_second: f64,
    #[prost(uint64, tag = "6")]
    pub window_seconds: u64,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct FleetSnapshotResponse {
    #[prost(message, repeated, tag = "1")]
    pub vehicles: ::prost::alloc::vec::Vec<VehicleState>,
    #[prost(message, optional, tag = "2")]
    pub metrics: ::core::option::Option<FleetMetrics>,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct StreamFleetSnapshotsRequest {
    #[prost(string, repeated, tag = "1")]
    pub vehicle_ids: ::prost::alloc::vec::Vec<::prost::alloc::string::String>,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct HistoryRequest {
    #[prost(string, repeated, tag = "1")]
    pub vehicle_ids: ::prost::alloc::vec::Vec<::prost::alloc::string::String>,
    #[prost(string, tag = "2")]
    pub start: ::prost::alloc::string::String,
    #[prost(string, tag = "3")]
    pub end: ::prost::alloc::string::String,
    #[prost(uint32, tag = "4")]
    pub limit: u32,
    #[prost(int64, tag = "5")]
    pub page_token: i64,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TelemetryEventMessage {
    #[prost(int64, tag = "1")]
    pub event_id: i64,
    #[prost(string, tag = "2")]
    pub vehicle_id: ::prost::alloc::string::String,
    #[prost(string, tag = "3")]
    pub recorded_at: ::prost::alloc::string::String,
    #[prost(string, tag = "4")]
    pub ingest_at: ::prost::alloc::string::String,
    #[prost(double, tag = "5")]
    pub lat: f64,
    #[prost(double, tag = "6")]
    pub lng: f64,
    #[prost(double, tag = "7")]
    pub speed_kmh: f64,
    #[prost(double, tag = "8")]
    pub fuel_level: f64,
    #[prost(string, tag = "9")]
    pub engine_status: ::prost::alloc::string::String,
    #[prost(double, tag = "10")]
    pub distance_km: f64,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AggregatesRequest {
    #[prost(string, repeated, tag = "1")]
    pub vehicle_ids: ::prost::alloc::vec::Vec<::prost::alloc::string::String>,
    #[prost(string, tag = "2")]
    pub start: ::prost::alloc::string::String,
    #[prost(string, tag = "3")]
    pub end: ::prost::alloc::string::String,
    #[prost(uint32, tag = "4")]
    pub window_seconds: u32,
    #[prost(string, repeated, tag = "5")]
    pub aggregates: ::prost::alloc::vec::Vec<::prost::alloc::string::String>,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AggregateBucketMessage {
    #[prost(string, tag = "1")]
    pub vehicle_id: ::prost::alloc::string::String,
    #[prost(int64, tag = "2")]
    pub bucket_start: i64,
    #[prost(int64, tag = "3")]
    pub bucket_end: i64,
    #[prost(double, optional, tag = "4")]
    pub avg_speed: ::core::option::Option<f64>,
    #[prost(double, optional, tag = "5")]
    pub max_speed: ::core::option::Option<f64>,
    #[prost(double, optional, tag = "6")]
    pub min_fuel: ::core::option::Option<f64>,
    #[prost(double, optional, tag = "7")]
    pub total_distance: ::core::option::Option<f64>,
    #[prost(uint64, optional, tag = "8")]
    pub sample_count: ::core::option::Option<u64>,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AggregatesResponse {
    #[prost(uint32, tag = "1")]
    pub window_seconds: u32,
    #[prost(message, repeated, tag = "2")]
    pub buckets: ::prost::alloc::vec::Vec<AggregateBucketMessage>,
}
/// Generated server implementations.
pub mod fleet_telemetry_server {
    #![allow(
        unused_variables,
        dead_code,
        missing_docs,
        clippy::wildcard_imports,
        clippy::let_unit_value
    )]
    use tonic::codegen::*;
    /// Generated trait containing gRPC methods that should be implemented for use with FleetTelemetryServer.
    #[async_trait]
    pub trait FleetTelemetry: Send + Sync + 'static {
        /// Point-in-time snapshot of the fleet, optionally with service metrics.
        async fn get_fleet_snapshot(
            &self,
            request: tonic::Request<super::FleetSnapshotRequest>,
        ) -> std::result::Result<
            tonic::Response<super::FleetSnapshotResponse>,
            tonic::Status,
        >;
        /// Server streaming response type for the StreamFleetSnapshots method.
        type StreamFleetSnapshotsStream: tonic::codegen::tokio_stream::Stream<
                Item = std::result::Result<super::VehicleState, tonic::Status>,
            >
            + std::marker::Send
            + 'static;
        /// Snapshot once, then pushes changed vehicles at the poll interval.
        async fn stream_fleet_snapshots(
            &self,
            request: tonic::Request<super::StreamFleetSnapshotsRequest>,
        ) -> std::result::Result<
            tonic::Response<Self::StreamFleetSnapshotsStream>,
            tonic::Status,
        >;
        /// Server streaming response type for the StreamHistory method.
        type StreamHistoryStream: tonic::codegen::tokio_stream::Stream<
                Item = std::result::Result<super::TelemetryEventMessage, tonic::Status>,
            >
            + std::marker::Send
            + 'static;
        /// One ascending-time page of history; `next-page-token` metadata is set
        /// when the page was truncated.
        async fn stream_history(
            &self,
            request: tonic::Request<super::HistoryRequest>,
        ) -> std::result::Result<tonic::Response<Self::StreamHistoryStream>, tonic::Status>;
        /// Windowed aggregates over the rollup table.
        async fn get_aggregates(
            &self,
            request: tonic::Request<super::AggregatesRequest>,
        ) -> std::result::Result<tonic::Response<super::AggregatesResponse>, tonic::Status>;
    }
    #[derive(Debug)]
    pub struct FleetTelemetryServer<T> {
        inner: Arc<T>,
        accept_compression_encodings: EnabledCompressionEncodings,
        send_compression_encodings: EnabledCompressionEncodings,
        max_decoding_message_size: Option<usize>,
        max_encoding_message_size: Option<usize>,
    }
    impl<T> FleetTelemetryServer<T> {
        pub fn new(inner: T) -> Self {
            Self::from_arc(Arc::new(inner))
        }
        pub fn from_arc(inner: Arc<T>) -> Self {
            Self {
                inner,
                accept_compression_encodings: Default::default(),
                send_compression_encodings: Default::default(),
                max_decoding_message_size: None,
                max_encoding_message_size: None,
            }
        }
        pub fn with_interceptor<F>(
            inner: T,
            interceptor: F,
        ) -> InterceptedService<Self, F>
        where
            F: tonic::service::Interceptor,
        {
            InterceptedService::new(Self::new(inner), interceptor)
        }
        /// Enable decompressing requests with the given encoding.
        #[must_use]
        pub fn accept_compressed(mut self, encoding: CompressionEncoding) -> Self {
            self.accept_compression_encodings.enable(encoding);
            self
        }
        /// Compress responses with the given encoding, if the client supports it.
        #[must_use]
        pub fn send_compressed(mut self, encoding: CompressionEncoding) -> Self {
            self.send_compression_encodings.enable(encoding);
            self
        }
        /// Limits the maximum size of a decoded message.
        ///
        /// Default: `4MB`
        #[must_use]
        pub fn max_decoding_message_size(mut self, limit: usize) -> Self {
            self.max_decoding_message_size = Some(limit);
            self
        }
        /// Limits the maximum size of an encoded message.
        ///
        /// Default: `usize::MAX`
        #[must_use]
        pub fn max_encoding_message_size(mut self, limit: usize) -> Self {
            self.max_encoding_message_size = Some(limit);
            self
        }
    }
    impl<T, B> tonic::codegen::Service<http::Request<B>> for FleetTelemetryServer<T>
    where
        T: FleetTelemetry,
        B: Body + std::marker::Send + 'static,
        B::Error: Into<StdError> + std::marker::Send + 'static,
    {
        type Response = http::Response<tonic::body::BoxBody>;
        type Error = std::convert::Infallible;
        type Future = BoxFuture<Self::Response, Self::Error>;
        fn poll_ready(
            &mut self,
            _cx: &mut Context<'_>,
        ) -> Poll<std::result::Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }
        fn call(&mut self, req: http::Request<B>) -> Self::Future {
            match req.uri().path() {
                "/fleetstream.v1.FleetTelemetry/GetFleetSnapshot" => {
                    #[allow(non_camel_case_types)]
                    struct GetFleetSnapshotSvc<T: FleetTelemetry>(pub Arc<T>);
                    impl<
                        T: FleetTelemetry,
                    > tonic::server::UnaryService<super::FleetSnapshotRequest>
                    for GetFleetSnapshotSvc<T> {
                        type Response = super::FleetSnapshotResponse;
                        type Future = BoxFuture<
                            tonic::Response<Self::Response>,
                            tonic::Status,
                        >;
                        fn call(
                            &mut self,
                            request: tonic::Request<super::FleetSnapshotRequest>,
                        ) -> Self::Future {
                            let inner = Arc::clone(&self.0);
                            let fut = async move {
                                <T as FleetTelemetry>::get_fleet_snapshot(&inner, request)
                                    .await
                            };
                            Box::pin(fut)
                        }
                    }
                    let accept_compression_encodings = self.accept_compression_encodings;
                    let send_compression_encodings = self.send_compression_encodings;
                    let max_decoding_message_size = self.max_decoding_message_size;
                    let max_encoding_message_size = self.max_encoding_message_size;
                    let inner = self.inner.clone();
                    let fut = async move {
                        let method = GetFleetSnapshotSvc(inner);
                        let codec = tonic::codec::ProstCodec::default();
                        let mut grpc = tonic::server::Grpc::new(codec)
                            .apply_compression_config(
                                accept_compression_encodings,
                                send_compression_encodings,
                            )
                            .apply_max_message_size_config(
                                max_decoding_message_size,
                                max_encoding_message_size,
                            );
                        let res = grpc.unary(method, req).await;
                        Ok(res)
                    };
                    Box::pin(fut)
                }
                "/fleetstream.v1.FleetTelemetry/StreamFleetSnapshots" => {
                    #[allow(non_camel_case_types)]
                    struct StreamFleetSnapshotsSvc<T: FleetTelemetry>(pub Arc<T>);
                    impl<
                        T: FleetTelemetry,
                    > tonic::server::ServerStreamingService<
                        super::StreamFleetSnapshotsRequest,
                    > for StreamFleetSnapshotsSvc<T> {
                        type Response = super::VehicleState;
                        type ResponseStream = T::StreamFleetSnapshotsStream;
                        type Future = BoxFuture<
                            tonic::Response<Self::ResponseStream>,
                            tonic::Status,
                        >;
                        fn call(
                            &mut self,
                            request: tonic::Request<super::StreamFleetSnapshotsRequest>,
                        ) -> Self::Future {
                            let inner = Arc::clone(&self.0);
                            let fut = async move {
                                <T as FleetTelemetry>::stream_fleet_snapshots(
                                        &inner,
                                        request,
                                    )
                                    .await
                            };
                            Box::pin(fut)
                        }
                    }
                    let accept_compression_encodings = self.accept_compression_encodings;
                    let send_compression_encodings = self.send_compression_encodings;
                    let max_decoding_message_size = self.max_decoding_message_size;
                    let max_encoding_message_size = self.max_encoding_message_size;
                    let inner = self.inner.clone();
                    let fut = async move {
                        let method = StreamFleetSnapshotsSvc(inner);
                        let codec = tonic::codec::ProstCodec::default();
                        let mut grpc = tonic::server::Grpc::new(codec)
                            .apply_compression_config(
                                accept_compression_encodings,
                                send_compression_encodings,
                            )
                            .apply_max_message_size_config(
                                max_decoding_message_size,
                                max_encoding_message_size,
                            );
                        let res = grpc.server_streaming(method, req).await;
                        Ok(res)
                    };
                    Box::pin(fut)
                }
                "/fleetstream.v1.FleetTelemetry/StreamHistory" => {
                    #[allow(non_camel_case_types)]
                    struct StreamHistorySvc<T: FleetTelemetry>(pub Arc<T>);
                    impl<
                        T: FleetTelemetry,
                    > tonic::server::ServerStreamingService<super::HistoryRequest>
                    for StreamHistorySvc<T> {
                        type Response = super::TelemetryEventMessage;
                        type ResponseStream = T::StreamHistoryStream;
                        type Future = BoxFuture<
                            tonic::Response<Self::ResponseStream>,
                            tonic::Status,
                        >;
                        fn call(
                            &mut self,
                            request: tonic::Request<super::HistoryRequest>,
                        ) -> Self::Future {
                            let inner = Arc::clone(&self.0);
                            let fut = async move {
                                <T as FleetTelemetry>::stream_history(&inner, request).await
                            };
                            Box::pin(fut)
                        }
                    }
                    let accept_compression_encodings = self.accept_compression_encodings;
                    let send_compression_encodings = self.send_compression_encodings;
                    let max_decoding_message_size = self.max_decoding_message_size;
                    let max_encoding_message_size = self.max_encoding_message_size;
                    let inner = self.inner.clone();
                    let fut = async move {
                        let method = StreamHistorySvc(inner);
                        let codec = tonic::codec::ProstCodec::default();
                        let mut grpc = tonic::server::Grpc::new(codec)
                            .apply_compression_config(
                                accept_compression_encodings,
                                send_compression_encodings,
                            )
                            .apply_max_message_size_config(
                                max_decoding_message_size,
                                max_encoding_message_size,
                            );
                        let res = grpc.server_streaming(method, req).await;
                        Ok(res)
                    };
                    Box::pin(fut)
                }
                "/fleetstream.v1.FleetTelemetry/GetAggregates" => {
                    #[allow(non_camel_case_types)]
                    struct GetAggregatesSvc<T: FleetTelemetry>(pub Arc<T>);
                    impl<
                        T: FleetTelemetry,
                    > tonic::server::UnaryService<super::AggregatesRequest>
                    for GetAggregatesSvc<T> {
                        type Response = super::AggregatesResponse;
                        type Future = BoxFuture<
                            tonic::Response<Self::Response>,
                            tonic::Status,
                        >;
                        fn call(
                            &mut self,
                            request: tonic::Request<super::AggregatesRequest>,
                        ) -> Self::Future {
                            let inner = Arc::clone(&self.0);
                            let fut = async move {
                                <T as FleetTelemetry>::get_aggregates(&inner, request).await
                            };
                            Box::pin(fut)
                        }
                    }
                    let accept_compression_encodings = self.accept_compression_encodings;
                    let send_compression_encodings = self.send_compression_encodings;
                    let max_decoding_message_size = self.max_decoding_message_size;
                    let max_encoding_message_size = self.max_encoding_message_size;
                    let inner = self.inner.clone();
                    let fut = async move {
                        let method = GetAggregatesSvc(inner);
                        let codec = tonic::codec::ProstCodec::default();
                        let mut grpc = tonic::server::Grpc::new(codec)
                            .apply_compression_config(
                                accept_compression_encodings,
                                send_compression_encodings,
                            )
                            .apply_max_message_size_config(
                                max_decoding_message_size,
                                max_encoding_message_size,
                            );
                        let res = grpc.unary(method, req).await;
                        Ok(res)
                    };
                    Box::pin(fut)
                }
                _ => {
                    Box::pin(async move {
                        let mut response = http::Response::new(empty_body());
                        let headers = response.headers_mut();
                        headers
                            .insert(
                                tonic::Status::GRPC_STATUS,
                                (tonic::Code::Unimplemented as i32).into(),
                            );
                        headers
                            .insert(
                                http::header::CONTENT_TYPE,
                                tonic::metadata::GRPC_CONTENT_TYPE,
                            );
                        Ok(response)
                    })
                }
            }
        }
    }
    impl<T> Clone for FleetTelemetryServer<T> {
        fn clone(&self) -> Self {
            let inner = self.inner.clone();
            Self {
                inner,
                accept_compression_encodings: self.accept_compression_encodings,
                send_compression_encodings: self.send_compression_encodings,
                max_decoding_message_size: self.max_decoding_message_size,
                max_encoding_message_size: self.max_encoding_message_size,
            }
        }
    }
    /// Generated gRPC service name
    pub const SERVICE_NAME: &str = "fleetstream.v1.FleetTelemetry";
    impl<T> tonic::server::NamedService for FleetTelemetryServer<T> {
        const NAME: &'static str = SERVICE_NAME;
    }
}
