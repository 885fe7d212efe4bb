//! Metrics tie-ins

use std::net::UdpSocket;

use cadence::{BufferedUdpMetricSink, NopMetricSink, QueuingMetricSink, StatsdClient};

use crate::errors::ApiResult;
use crate::settings::Settings;

/// Create a cadence StatsdClient from the given settings
pub fn new_metrics(settings: &Settings) -> ApiResult<StatsdClient> {
    let builder = if let Some(statsd_host) = settings.statsd_host.as_ref() {
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        socket.set_nonblocking(true)?;

        let host = (statsd_host.as_str(), settings.statsd_port);
        let udp_sink = BufferedUdpMetricSink::from(host, socket)?;
        let sink = QueuingMetricSink::from(udp_sink);
        StatsdClient::builder(&settings.statsd_label, sink)
    } else {
        StatsdClient::builder(&settings.statsd_label, NopMetricSink)
    };
    Ok(builder
        .with_error_handler(|err| error!("Metrics send error: {}", err))
        .build())
}

#[cfg(test)]
mod tests {
    use cadence::CountedExt;

    use super::*;

    #[test]
    fn test_sink_selection() {
        // no host configured: counters go to the nop sink without error
        let settings = Settings {
            statsd_host: None,
            ..Settings::test_settings()
        };
        let metrics = new_metrics(&settings).unwrap();
        assert!(metrics.incr("test.counter").is_ok());

        // host configured: a non-blocking UDP sink is built (nothing needs
        // to be listening)
        let settings = Settings {
            statsd_host: Some("localhost".to_owned()),
            ..Settings::test_settings()
        };
        let metrics = new_metrics(&settings).unwrap();
        assert!(metrics.incr("test.counter").is_ok());
    }
}
