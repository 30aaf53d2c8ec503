//! Transport instrumentation
//!
//! An SDK interceptor that times every HTTP attempt, retries included, and
//! records it by lowercased method and response status code. Attempts that
//! never produced a response are not recorded.

use crate::metrics::{self, S3Metrics};
use aws_smithy_runtime_api::box_error::BoxError;
use aws_smithy_runtime_api::client::interceptors::context::{
    BeforeDeserializationInterceptorContextRef, BeforeTransmitInterceptorContextRef,
};
use aws_smithy_runtime_api::client::interceptors::Intercept;
use aws_smithy_runtime_api::client::runtime_components::RuntimeComponents;
use aws_smithy_types::config_bag::{ConfigBag, Storable, StoreReplace};
use std::fmt;
use std::time::Instant;

/// Start of the attempt currently on the wire
#[derive(Debug, Clone)]
struct AttemptStart {
    method: String,
    at: Instant,
}

impl Storable for AttemptStart {
    type Storer = StoreReplace<Self>;
}

/// Records `s3_requests_total` and `s3_request_duration_seconds`
pub struct RequestMetricsInterceptor {
    metrics: S3Metrics,
}

impl RequestMetricsInterceptor {
    pub fn new(metrics: S3Metrics) -> Self {
        Self { metrics }
    }
}

impl fmt::Debug for RequestMetricsInterceptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestMetricsInterceptor")
            .finish_non_exhaustive()
    }
}

impl Intercept for RequestMetricsInterceptor {
    fn name(&self) -> &'static str {
        "RequestMetricsInterceptor"
    }

    fn read_before_transmit(
        &self,
        context: &BeforeTransmitInterceptorContextRef<'_>,
        _runtime_components: &RuntimeComponents,
        cfg: &mut ConfigBag,
    ) -> Result<(), BoxError> {
        cfg.interceptor_state().store_put(AttemptStart {
            method: context.request().method().to_ascii_lowercase(),
            at: Instant::now(),
        });
        Ok(())
    }

    fn read_after_transmit(
        &self,
        context: &BeforeDeserializationInterceptorContextRef<'_>,
        _runtime_components: &RuntimeComponents,
        cfg: &mut ConfigBag,
    ) -> Result<(), BoxError> {
        if let Some(start) = cfg.load::<AttemptStart>() {
            metrics::record_request(
                &self.metrics,
                &start.method,
                context.response().status().as_u16(),
                start.at.elapsed(),
            );
        }
        Ok(())
    }
}
