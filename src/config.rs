//! Serial line settings and their XML configuration file.
//!
//! The file looks like:
//!
//! ```xml
//! <uart>
//!   <portName>/dev/ttyUSB0</portName>
//!   <baudRate>9600</baudRate>
//!   <dataBits>8</dataBits>
//!   <parity>NoParity</parity>
//!   <stopBits>1</stopBits>
//!   <flowControl>NoFlowControl</flowControl>
//! </uart>
//! ```

use std::fmt::Write as _;
use std::path::Path;

use thiserror::Error;
use tracing::{debug, warn};

/// File name looked up next to the executable when no path is given.
pub const DEFAULT_CONFIG_FILE: &str = "comConfig.xml";

/// Number of data bits per character.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataBits {
    /// 5 bits.
    Five,
    /// 6 bits.
    Six,
    /// 7 bits.
    Seven,
    /// 8 bits.
    Eight,
    /// Anything else.
    Unknown,
}

impl DataBits {
    fn from_count(count: Option<i64>) -> Self {
        match count {
            Some(5) => Self::Five,
            Some(6) => Self::Six,
            Some(7) => Self::Seven,
            Some(8) => Self::Eight,
            _ => Self::Unknown,
        }
    }

    const fn count(self) -> u8 {
        match self {
            Self::Five => 5,
            Self::Six => 6,
            Self::Seven => 7,
            Self::Eight => 8,
            Self::Unknown => 0,
        }
    }
}

/// Parity checking mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Parity {
    /// No parity bit.
    None,
    /// Even parity.
    Even,
    /// Odd parity.
    Odd,
    /// Parity bit always 0.
    Space,
    /// Parity bit always 1.
    Mark,
    /// Unrecognized value.
    Unknown,
}

impl Parity {
    const NAMES: [(&'static str, Self); 5] = [
        ("NoParity", Self::None),
        ("EvenParity", Self::Even),
        ("OddParity", Self::Odd),
        ("SpaceParity", Self::Space),
        ("MarkParity", Self::Mark),
    ];

    fn from_text(text: &str) -> Self {
        Self::NAMES
            .iter()
            .find(|(name, _)| text.contains(name))
            .map_or(Self::Unknown, |&(_, parity)| parity)
    }

    fn name(self) -> &'static str {
        Self::NAMES
            .iter()
            .find(|&&(_, parity)| parity == self)
            .map_or("UnknownParity", |&(name, _)| name)
    }
}

/// Number of stop bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopBits {
    /// One stop bit.
    One,
    /// Two stop bits.
    Two,
    /// One and a half stop bits.
    OneAndHalf,
    /// Anything else.
    Unknown,
}

impl StopBits {
    fn from_code(code: Option<i64>) -> Self {
        match code {
            Some(1) => Self::One,
            Some(2) => Self::Two,
            Some(3) => Self::OneAndHalf,
            _ => Self::Unknown,
        }
    }

    const fn code(self) -> u8 {
        match self {
            Self::One => 1,
            Self::Two => 2,
            Self::OneAndHalf => 3,
            Self::Unknown => 0,
        }
    }
}

/// Flow control mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowControl {
    /// No flow control.
    None,
    /// RTS/CTS.
    Hardware,
    /// XON/XOFF.
    Software,
    /// Unrecognized value.
    Unknown,
}

impl FlowControl {
    const NAMES: [(&'static str, Self); 3] = [
        ("NoFlowControl", Self::None),
        ("HardwareControl", Self::Hardware),
        ("SoftwareControl", Self::Software),
    ];

    fn from_text(text: &str) -> Self {
        Self::NAMES
            .iter()
            .find(|(name, _)| text.contains(name))
            .map_or(Self::Unknown, |&(_, flow)| flow)
    }

    fn name(self) -> &'static str {
        Self::NAMES
            .iter()
            .find(|&&(_, flow)| flow == self)
            .map_or("UnknownFlowControl", |&(name, _)| name)
    }
}

/// Parameters used once to open the serial line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialSettings {
    /// Port identifier (`COM1`, `/dev/ttyUSB0`, ...).
    pub port_name: String,
    /// Baud rate.
    pub baud_rate: u32,
    /// Data bit width.
    pub data_bits: DataBits,
    /// Parity mode.
    pub parity: Parity,
    /// Stop bit count.
    pub stop_bits: StopBits,
    /// Flow control mode.
    pub flow_control: FlowControl,
}

impl Default for SerialSettings {
    /// Settings used before any configuration file is read.
    fn default() -> Self {
        Self {
            baud_rate: 115_200,
            ..Self::file_fallback()
        }
    }
}

impl std::fmt::Display for SerialSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} : {}, {}, {}, {}, {}",
            self.port_name,
            self.baud_rate,
            self.data_bits.count(),
            self.parity.name(),
            self.stop_bits.code(),
            self.flow_control.name()
        )
    }
}

/// Errors reading the serial configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("couldn't open {path}: {source}")]
    Read {
        /// File that was requested.
        path: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// The file is not well-formed XML.
    #[error("malformed XML: {0}")]
    Xml(#[from] roxmltree::Error),
    /// The document root is not `uart`.
    #[error("unexpected root element <{0}>, expected <uart>")]
    UnexpectedRoot(String),
    /// A numeric field could not be parsed.
    #[error("invalid value {value:?} for <{field}>")]
    InvalidValue {
        /// Element name.
        field: &'static str,
        /// Offending text.
        value: String,
    },
}

impl SerialSettings {
    /// Defaults substituted when the configuration file is unusable.
    #[must_use]
    pub fn file_fallback() -> Self {
        Self {
            port_name: "COM1".to_owned(),
            baud_rate: 1200,
            data_bits: DataBits::Eight,
            parity: Parity::None,
            stop_bits: StopBits::One,
            flow_control: FlowControl::None,
        }
    }

    /// Parse a `<uart>` document.
    ///
    /// Elements that are absent keep their [`SerialSettings::file_fallback`]
    /// value; unknown elements are ignored.
    pub fn from_xml(text: &str) -> Result<Self, ConfigError> {
        let doc = roxmltree::Document::parse(text)?;
        let root = doc.root_element();
        if root.tag_name().name() != "uart" {
            return Err(ConfigError::UnexpectedRoot(
                root.tag_name().name().to_owned(),
            ));
        }

        let mut settings = Self::file_fallback();
        for node in root.children().filter(roxmltree::Node::is_element) {
            let text = node.text().unwrap_or_default().trim();
            match node.tag_name().name() {
                "portName" => text.clone_into(&mut settings.port_name),
                "baudRate" => {
                    settings.baud_rate =
                        text.parse().map_err(|_| ConfigError::InvalidValue {
                            field: "baudRate",
                            value: text.to_owned(),
                        })?;
                }
                "dataBits" => settings.data_bits = DataBits::from_count(text.parse().ok()),
                "parity" => settings.parity = Parity::from_text(text),
                "stopBits" => settings.stop_bits = StopBits::from_code(text.parse().ok()),
                "flowControl" => settings.flow_control = FlowControl::from_text(text),
                other => debug!("ignoring <{other}> in serial config"),
            }
        }

        Ok(settings)
    }

    /// Read and parse a configuration file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_xml(&text)
    }

    /// Read a configuration file, falling back to
    /// [`SerialSettings::file_fallback`] on any error.
    #[must_use]
    pub fn load_or_fallback(path: &Path) -> Self {
        match Self::from_file(path) {
            Ok(settings) => {
                debug!(%settings, "loaded serial configuration");
                settings
            }
            Err(err) => {
                warn!(path = %path.display(), "serial config unusable, using defaults: {err}");
                Self::file_fallback()
            }
        }
    }

    /// Serialize into the format read by [`SerialSettings::from_xml`].
    #[must_use]
    pub fn to_xml(&self) -> String {
        let mut xml = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<uart>\n");
        let port = self
            .port_name
            .replace('&', "&amp;")
            .replace('<', "&lt;")
            .replace('>', "&gt;");
        let _ = writeln!(xml, "  <portName>{port}</portName>");
        let _ = writeln!(xml, "  <baudRate>{}</baudRate>", self.baud_rate);
        let _ = writeln!(xml, "  <dataBits>{}</dataBits>", self.data_bits.count());
        let _ = writeln!(xml, "  <parity>{}</parity>", self.parity.name());
        let _ = writeln!(xml, "  <stopBits>{}</stopBits>", self.stop_bits.code());
        let _ = writeln!(
            xml,
            "  <flowControl>{}</flowControl>",
            self.flow_control.name()
        );
        xml.push_str("</uart>\n");
        xml
    }
}

/// Default configuration path: [`DEFAULT_CONFIG_FILE`] beside the executable.
#[must_use]
pub fn default_config_path() -> std::path::PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
        .unwrap_or_default()
        .join(DEFAULT_CONFIG_FILE)
}
