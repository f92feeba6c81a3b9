/// Escher record types.
///
/// Values are the MS-ODRAW record type codes. Anything not listed here
/// decodes as [`EscherRecordType::Unknown`] and is carried as an opaque atom.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum EscherRecordType {
    /// Unknown or unsupported record type
    Unknown = 0x0000,

    // Container records
    /// Drawing Group Container (workbook level)
    DggContainer = 0xF000,
    /// Blip Store Container
    BStoreContainer = 0xF001,
    /// Drawing Container (one per sheet or chart)
    DgContainer = 0xF002,
    /// Shape Group Container
    SpgrContainer = 0xF003,
    /// Shape Container
    SpContainer = 0xF004,
    /// Solver Container (connector and alignment rules)
    SolverContainer = 0xF005,

    // Atom records
    /// File Drawing Group atom
    Dgg = 0xF006,
    /// Blip Store Entry
    Bse = 0xF007,
    /// Drawing atom (shape count, last shape id)
    Dg = 0xF008,
    /// Shape Group coordinates
    Spgr = 0xF009,
    /// Shape identity
    Sp = 0xF00A,
    /// Property table
    Opt = 0xF00B,
    /// Client Textbox (attached text)
    ClientTextbox = 0xF00D,
    /// Child Anchor
    ChildAnchor = 0xF00F,
    /// Client Anchor
    ClientAnchor = 0xF010,
    /// Client Data
    ClientData = 0xF011,
    /// Connector Rule
    ConnectorRule = 0xF012,
    /// Align Rule
    AlignRule = 0xF013,
    /// Arc Rule
    ArcRule = 0xF014,
    /// Client Rule
    ClientRule = 0xF015,
    /// Callout Rule
    CalloutRule = 0xF017,
    /// Regroup items
    RegroupItems = 0xF118,
    /// Color MRU
    ColorMru = 0xF11A,
    /// Split Menu Colors
    SplitMenuColors = 0xF11E,
    /// Color scheme
    ColorScheme = 0xF120,
    /// Secondary property table
    SecondaryOpt = 0xF121,
    /// Tertiary property table
    TertiaryOpt = 0xF122,
}

impl EscherRecordType {
    /// Check if this is a container record type the tree codec can descend into.
    #[inline]
    pub const fn is_container(self) -> bool {
        matches!(
            self,
            Self::DggContainer
                | Self::BStoreContainer
                | Self::DgContainer
                | Self::SpgrContainer
                | Self::SpContainer
                | Self::SolverContainer
        )
    }
}

impl From<u16> for EscherRecordType {
    fn from(value: u16) -> Self {
        match value {
            0xF000 => Self::DggContainer,
            0xF001 => Self::BStoreContainer,
            0xF002 => Self::DgContainer,
            0xF003 => Self::SpgrContainer,
            0xF004 => Self::SpContainer,
            0xF005 => Self::SolverContainer,
            0xF006 => Self::Dgg,
            0xF007 => Self::Bse,
            0xF008 => Self::Dg,
            0xF009 => Self::Spgr,
            0xF00A => Self::Sp,
            0xF00B => Self::Opt,
            0xF00D => Self::ClientTextbox,
            0xF00F => Self::ChildAnchor,
            0xF010 => Self::ClientAnchor,
            0xF011 => Self::ClientData,
            0xF012 => Self::ConnectorRule,
            0xF013 => Self::AlignRule,
            0xF014 => Self::ArcRule,
            0xF015 => Self::ClientRule,
            0xF017 => Self::CalloutRule,
            0xF118 => Self::RegroupItems,
            0xF11A => Self::ColorMru,
            0xF11E => Self::SplitMenuColors,
            0xF120 => Self::ColorScheme,
            0xF121 => Self::SecondaryOpt,
            0xF122 => Self::TertiaryOpt,
            _ => Self::Unknown,
        }
    }
}

impl From<EscherRecordType> for u16 {
    fn from(record_type: EscherRecordType) -> Self {
        record_type as u16
    }
}
