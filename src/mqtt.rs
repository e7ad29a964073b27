use anyhow::{bail, Context, Result};
use rumqttc::{Client, ClientError, Connection, MqttOptions, QoS};
use serde::Deserialize;
use std::time::Duration;

/// Requests queued for the event loop before publishing starts dropping
/// records.
const REQUEST_CAPACITY: usize = 10;

#[derive(Debug, Deserialize, Clone)]
pub struct MqttConfig {
    host: String,
    #[serde(default = "MqttConfig::default_port")]
    port: u16,
    username: Option<String>,
    password: Option<String>,
    #[serde(default = "MqttConfig::default_topic")]
    topic: String,
    #[serde(default)]
    qos: u8,
    #[serde(default = "MqttConfig::default_client_id")]
    client_id: String,
    #[serde(default = "MqttConfig::default_keep_alive", with = "humantime_serde")]
    keep_alive: Duration,
}

impl MqttConfig {
    fn default_port() -> u16 {
        1883
    }

    fn default_topic() -> String {
        "energy/data".into()
    }

    fn generate_random_string(len: usize) -> String {
        use rand::distributions::Alphanumeric;
        use rand::Rng;

        rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(len)
            .map(char::from)
            .collect()
    }

    fn default_client_id() -> String {
        format!("cumeter-{}", Self::generate_random_string(8))
    }

    fn default_keep_alive() -> Duration {
        Duration::from_secs(30)
    }

    pub const DEFAULT_CONFIG_FILE: &str = "mqtt.yaml";

    pub fn load(config_file_path: &str) -> Result<Self> {
        log::debug!("Loading config file from {config_file_path:?}");
        let config_file = std::fs::File::open(config_file_path)
            .with_context(|| format!("Cannot open MQTT config file {config_file_path:?}"))?;
        let config: Self = serde_yaml::from_reader(&config_file)
            .with_context(|| format!("Cannot read MQTT config from file: {config_file_path:?}"))?;
        config.qos()?;
        Ok(config)
    }

    fn qos(&self) -> Result<QoS> {
        match self.qos {
            0 => Ok(QoS::AtMostOnce),
            1 => Ok(QoS::AtLeastOnce),
            2 => Ok(QoS::ExactlyOnce),
            qos => bail!("Invalid MQTT QoS {qos}, expected 0, 1 or 2"),
        }
    }

    fn create_client(&self) -> (Client, Connection) {
        let mut options = MqttOptions::new(&self.client_id, &self.host, self.port);
        options.set_keep_alive(self.keep_alive).set_clean_session(true);
        if let Some(username) = &self.username {
            options.set_credentials(username, self.password.as_deref().unwrap_or_default());
        }
        log::info!(
            "Connecting to MQTT broker {}:{} with client_id: {}",
            self.host,
            self.port,
            self.client_id
        );
        Client::new(options, REQUEST_CAPACITY)
    }
}

pub struct MqttPublisher {
    client: Client,
    config: MqttConfig,
    qos: QoS,
}

impl MqttPublisher {
    pub fn new(config: MqttConfig) -> Result<Self> {
        let qos = config.qos()?;
        let (client, mut connection) = config.create_client();
        // the event loop has to be polled for anything to be sent
        std::thread::Builder::new()
            .name("mqtt-eventloop".into())
            .spawn(move || {
                for notification in connection.iter() {
                    match notification {
                        Ok(event) => log::trace!("MQTT event: {event:?}"),
                        Err(err) => {
                            log::warn!("MQTT connection error: {err}");
                            std::thread::sleep(Duration::from_secs(1));
                        }
                    }
                }
            })
            .with_context(|| "Cannot start MQTT event loop")?;
        Ok(Self {
            client,
            config,
            qos,
        })
    }

    pub fn topic(&self) -> &str {
        &self.config.topic
    }

    pub fn publish(&mut self, topic: &str, payload: &str) -> Result<()> {
        log::debug!(
            "Publishing to MQTT: Topic='{}', Payload='{payload}', QoS={:?}",
            topic,
            self.qos
        );

        // never wait on the request queue, it stays full while the broker is down
        match self
            .client
            .try_publish(topic, self.qos, false, payload.as_bytes().to_vec())
        {
            Ok(()) => Ok(()),
            Err(ClientError::TryRequest(_)) => {
                bail!("MQTT request queue is full, record for topic {topic} dropped")
            }
            Err(err) => Err(err)
                .with_context(|| format!("Failed to publish message to MQTT topic: {}", topic)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn load_with_defaults() {
        let file = write_config("host: broker.local\n");
        let config = MqttConfig::load(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.host, "broker.local");
        assert_eq!(config.port, 1883);
        assert_eq!(config.topic, "energy/data");
        assert_eq!(config.qos().unwrap(), QoS::AtMostOnce);
        assert!(config.client_id.starts_with("cumeter-"));
        assert_eq!(config.client_id.len(), "cumeter-".len() + 8);
        assert_eq!(config.keep_alive, Duration::from_secs(30));
        assert!(config.username.is_none());
    }

    #[test]
    fn load_full() {
        let file = write_config(
            "host: 10.0.0.2\nport: 8883\nusername: user\npassword: pass\ntopic: meter/1\nqos: 1\nclient_id: kitchen\nkeep_alive: 1m\n",
        );
        let config = MqttConfig::load(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.port, 8883);
        assert_eq!(config.username.as_deref(), Some("user"));
        assert_eq!(config.password.as_deref(), Some("pass"));
        assert_eq!(config.topic, "meter/1");
        assert_eq!(config.qos().unwrap(), QoS::AtLeastOnce);
        assert_eq!(config.client_id, "kitchen");
        assert_eq!(config.keep_alive, Duration::from_secs(60));
    }

    #[test]
    fn load_rejects_bad_qos() {
        let file = write_config("host: localhost\nqos: 3\n");
        assert!(MqttConfig::load(file.path().to_str().unwrap()).is_err());
    }

    #[test]
    fn load_missing_file() {
        assert!(MqttConfig::load("/nonexistent/cumeter/mqtt.yaml").is_err());
    }

    #[test]
    fn publish_returns_while_broker_is_unreachable() {
        let config: MqttConfig = serde_yaml::from_str("host: 127.0.0.1\nport: 1\n").unwrap();
        let mut publisher = MqttPublisher::new(config).unwrap();
        let (tx, rx) = std::sync::mpsc::channel();
        std::thread::spawn(move || {
            let topic = publisher.topic().to_string();
            let results: Vec<bool> = (0..REQUEST_CAPACITY + 5)
                .map(|_| publisher.publish(&topic, "{}").is_ok())
                .collect();
            tx.send(results).unwrap();
        });
        let results = rx
            .recv_timeout(Duration::from_secs(10))
            .expect("publish blocked on the request queue");
        assert_eq!(results.len(), REQUEST_CAPACITY + 5);
        assert!(results.iter().any(|published| !published));
    }
}
