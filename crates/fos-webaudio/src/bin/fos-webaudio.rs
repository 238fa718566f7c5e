//! fOS WebAudio - play a URL through a media element
//!
//! Usage: fos-webaudio <url> [seconds]

use std::rc::Rc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context};
use fos_transport::{DefaultTransport, FetchConfig};
use fos_webaudio::{AudioContext, MediaContext, MediaElement, MediaEvent, SymphoniaDecoder};

/// Play time argument, 5 seconds when absent
fn parse_seconds(arg: Option<&str>) -> anyhow::Result<f64> {
    let Some(arg) = arg else {
        return Ok(5.0);
    };
    let seconds: f64 = arg.parse().with_context(|| format!("invalid seconds: {arg}"))?;
    if !seconds.is_finite() || seconds < 0.0 {
        bail!("seconds must be a finite, non-negative number: {arg}");
    }
    Ok(seconds)
}

fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let Some(url) = args.next() else {
        bail!("usage: fos-webaudio <url> [seconds]");
    };
    let seconds = parse_seconds(args.next().as_deref())?;

    let transport = DefaultTransport::new(&FetchConfig::default()).context("creating transport")?;
    let audio = Rc::new(AudioContext::new());
    let ctx = MediaContext::with_transport(Arc::new(transport), Arc::new(SymphoniaDecoder), audio.clone());

    let mut builder = MediaElement::builder(ctx).src(url.as_str());
    for event in MediaEvent::ALL {
        builder = builder.listen(event, move || tracing::info!("<- {}", event));
    }
    let mut element = builder.build().context("starting load")?;

    element.settle()?;
    if let Some(error) = element.error() {
        bail!("{url}: {error}");
    }

    tracing::info!(
        "Playing {} ({:.2}s of {:.2}s)",
        element.current_src(),
        seconds,
        element.duration()
    );

    let deadline = Instant::now() + Duration::from_secs_f64(seconds);
    while Instant::now() < deadline && !element.ended() {
        element.poll()?;
        std::thread::sleep(Duration::from_millis(50));
    }
    element.pause()?;

    println!("{:.3}", element.current_time());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_seconds() {
        assert_eq!(parse_seconds(None).unwrap(), 5.0);
        assert_eq!(parse_seconds(Some("2.5")).unwrap(), 2.5);
        assert!(parse_seconds(Some("inf")).is_err());
        assert!(parse_seconds(Some("NaN")).is_err());
        assert!(parse_seconds(Some("-1")).is_err());
        assert!(parse_seconds(Some("soon")).is_err());
    }
}
