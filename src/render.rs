//! ==============================================================================
//! render.rs - chart view and dashboard pages
//! ==============================================================================
//!
//! purpose:
//!     read-only side of the history dashboard. turns the current Series
//!     snapshot into the json the chart draws from (points, mean, mean line)
//!     and serves the two static html pages.
//!
//! relationships:
//!     - used by: server.rs (handlers)
//!     - reads: series.rs (never mutates it)
//!
//! ==============================================================================

use serde::Serialize;

use crate::series::{MeanLine, Series};

/// what the history chart needs for one redraw
#[derive(Debug, Serialize)]
pub struct ChartView {
    pub attribute: String,
    /// rfc3339 in the display zone, arrival order
    pub timestamps: Vec<String>,
    pub values: Vec<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mean: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mean_line: Option<MeanLine>,
}

impl ChartView {
    pub fn from_series(attribute: &str, series: &Series) -> Self {
        Self {
            attribute: attribute.to_string(),
            timestamps: series.timestamps().iter().map(|t| t.to_rfc3339()).collect(),
            values: series.values().to_vec(),
            mean: series.mean(),
            mean_line: series.mean_line(),
        }
    }
}

/// escape html special characters to prevent xss
pub fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// string literal safe to drop inside a <script> block
fn js_string(s: &str) -> String {
    serde_json::to_string(s)
        .unwrap_or_else(|_| "\"\"".to_string())
        .replace('<', "\\u003c")
}

/// history chart page; polls /api/series every `refresh_ms`
pub fn history_page(attribute: &str, refresh_ms: u64) -> String {
    HISTORY_TEMPLATE
        .replace("{{ATTRIBUTE_JS}}", &js_string(attribute))
        .replace("{{ATTRIBUTE}}", &html_escape(attribute))
        .replace("{{REFRESH_MS}}", &refresh_ms.to_string())
}

/// live gauge page; listens on /ws
pub fn live_page() -> String {
    LIVE_TEMPLATE.to_string()
}

const HISTORY_TEMPLATE: &str = r#"<!DOCTYPE html>
<html lang="pt-BR">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>Visualizador de Dados - {{ATTRIBUTE}}</title>
    <script src="https://cdn.jsdelivr.net/npm/chart.js"></script>
    <style>
        body { font-family: system-ui; margin: 2rem; font-size: 12px; }
        #chart-wrap { max-width: 960px; }
        #empty { color: #888; }
    </style>
</head>
<body>
    <h1>Visualizador de Dados - {{ATTRIBUTE}}</h1>
    <div id="empty">Aguardando dados...</div>
    <div id="chart-wrap"><canvas id="history"></canvas></div>
    <script>
        const chart = new Chart(document.getElementById('history'), {
            type: 'line',
            data: { labels: [], datasets: [
                { label: 'Valor', data: [], borderColor: 'orange', borderWidth: 2, pointRadius: 3 },
                { label: 'Valor Médio', data: [], borderColor: 'blue', borderDash: [6, 4], borderWidth: 2, pointRadius: 0, spanGaps: true }
            ] },
            options: {
                animation: false,
                interaction: { mode: 'nearest', intersect: true },
                scales: { x: { title: { display: true, text: 'Timestamp' } }, y: { title: { display: true, text: {{ATTRIBUTE_JS}} } } }
            }
        });

        async function refresh() {
            try {
                const view = await (await fetch('/api/series')).json();
                if (view.values.length === 0) return;
                document.getElementById('empty').style.display = 'none';
                const last = view.values.length - 1;
                chart.data.labels = view.timestamps;
                chart.data.datasets[0].data = view.values;
                chart.data.datasets[1].data = view.values.map((_, i) => (i === 0 || i === last) ? view.mean_line.value : null);
                chart.update();
            } catch (e) {
                console.warn('refresh failed', e);
            }
        }

        refresh();
        setInterval(refresh, {{REFRESH_MS}});
    </script>
</body>
</html>
"#;

const LIVE_TEMPLATE: &str = r#"<!DOCTYPE html>
<html lang="pt-BR">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>Visualizador de Dados ao Vivo</title>
    <script src="https://cdn.jsdelivr.net/npm/chart.js"></script>
    <style>
        body { font-family: system-ui; margin: 2rem; }
        canvas { max-width: 400px; margin: auto; }
        .valor { font-size: 48px; font-weight: bold; }
    </style>
</head>
<body>
    <h1>Luminosidade</h1>
    <canvas id="gauge" width="400" height="400"></canvas>
    <div id="luminosity" class="valor">Aguardando dados...</div>
    <h2>Temperatura</h2>
    <div id="temperature" class="valor">Aguardando dados...</div>
    <h2>Umidade</h2>
    <div id="humidity" class="valor">Aguardando dados...</div>
    <script>
        const gauge = new Chart(document.getElementById('gauge'), {
            type: 'doughnut',
            data: { labels: ['Valor', 'Restante'], datasets: [{ data: [0, 100], backgroundColor: ['#36A2EB', '#E0E0E0'], borderWidth: 1 }] },
            options: { responsive: true, cutout: '70%' }
        });

        function connect() {
            const scheme = location.protocol === 'https:' ? 'wss://' : 'ws://';
            const socket = new WebSocket(scheme + location.host + '/ws');
            socket.onmessage = (msg) => {
                const event = JSON.parse(msg.data);
                const kind = event.event.replace('novo_dado_', '');
                const el = document.getElementById({ luminosidade: 'luminosity', temperatura: 'temperature', umidade: 'humidity' }[kind]);
                if (el) el.textContent = 'Medição: ' + JSON.stringify(event.valor);
                if (kind === 'luminosidade' && typeof event.valor === 'number') {
                    gauge.data.datasets[0].data = [event.valor, 100 - event.valor];
                    gauge.update();
                }
            };
            socket.onclose = () => setTimeout(connect, 2000);
        }
        connect();
    </script>
</body>
</html>
"#;

// ==============================================================================
// tests
// ==============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{parse_batch, RawRecord};
    use chrono_tz::Europe::Lisbon;

    #[test]
    fn test_empty_view_has_no_mean() {
        let view = ChartView::from_series("luminosity", &Series::new());
        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["values"], serde_json::json!([]));
        assert!(json.get("mean").is_none());
        assert!(json.get("mean_line").is_none());
    }

    #[test]
    fn test_view_carries_mean_line() {
        let readings = parse_batch(
            &[
                RawRecord::new("10", "2024-07-01 12:00:00"),
                RawRecord::new("20", "2024-07-01 12:00:05"),
            ],
            Lisbon,
        )
        .unwrap();
        let view = ChartView::from_series("luminosity", &Series::new().merged(&readings));

        assert_eq!(view.timestamps[0], "2024-07-01T13:00:00+01:00");
        assert_eq!(view.mean, Some(15.0));

        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["mean_line"]["value"], 15.0);
        assert_eq!(json["mean_line"]["from"], "2024-07-01T13:00:00+01:00");
        assert_eq!(json["mean_line"]["to"], "2024-07-01T13:00:05+01:00");
    }

    #[test]
    fn test_history_page_escapes_attribute() {
        let html = history_page("<lum>", 5000);
        assert!(html.contains("&lt;lum&gt;"));
        assert!(html.contains("setInterval(refresh, 5000)"));
        assert!(!html.contains("{{"));
    }

    #[test]
    fn test_history_page_quotes_attribute_in_script() {
        let html = history_page("it's </script>", 5000);
        assert!(html.contains(r#"text: "it's \u003c/script>" }"#));
        assert!(!html.contains("it's </script>"));
    }
}
