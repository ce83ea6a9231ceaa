use opentelemetry::global;
use opentelemetry::trace::TracerProvider;
use opentelemetry_sdk::propagation::TraceContextPropagator;
use tracing_opentelemetry::OpenTelemetryLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub fn init_telemetry(service_name: &'static str) {
    // Set W3C trace context propagator
    global::set_text_map_propagator(TraceContextPropagator::new());

    let provider = opentelemetry_sdk::trace::SdkTracerProvider::builder()
        .with_simple_exporter(opentelemetry_stdout::SpanExporter::default())
        .build();

    let tracer = provider.tracer(service_name);

    let otel = OpenTelemetryLayer::new(tracer);
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive("collector=info".parse().unwrap()))
        .with(tracing_subscriber::fmt::layer().compact())
        .with(otel)
        .init();
}
