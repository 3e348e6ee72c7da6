/// Server-side value type tags.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ParticleType {
    /// Empty value.
    Null = 0,
    /// 64-bit signed integer.
    Integer = 1,
    /// 64-bit IEEE-754 float.
    Float = 2,
    /// UTF-8 string.
    String = 3,
    /// Raw bytes.
    Blob = 4,
    /// Boolean.
    Bool = 17,
    /// MessagePack encoded map.
    Map = 19,
    /// MessagePack encoded list.
    List = 20,
    /// GeoJSON string.
    GeoJson = 23,
}

#[derive(Debug, thiserror::Error)]
#[error("unrecognized particle type `{0}`")]
pub struct ParseParticleError(u8);

impl TryFrom<u8> for ParticleType {
    type Error = ParseParticleError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => Self::Null,
            1 => Self::Integer,
            2 => Self::Float,
            3 => Self::String,
            4 => Self::Blob,
            17 => Self::Bool,
            19 => Self::Map,
            20 => Self::List,
            23 => Self::GeoJson,
            other => return Err(ParseParticleError(other)),
        })
    }
}
