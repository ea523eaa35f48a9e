//! Deserialize data from the bytecode protocol.
use bytes::Bytes;
use nom::{
    bytes::complete::take,
    combinator::map,
    error::{ErrorKind, ParseError},
    multi::many_m_n,
    number::complete::{be_i16, be_i32, be_u16, be_u32},
    Err::*,
    IResult,
    Needed::Unknown,
};
use nombytes::NomBytes;
use num_traits::FromPrimitive;

use crate::error::KafkaCode;

pub fn parse_kafka_code(s: NomBytes) -> IResult<NomBytes, KafkaCode> {
    map(be_i16, |n| {
        FromPrimitive::from_i16(n).unwrap_or(KafkaCode::Unknown)
    })(s)
}

pub fn take_varint<E>(i: NomBytes) -> nom::IResult<NomBytes, usize, E>
where
    E: ParseError<NomBytes>,
{
    let mut res: usize = 0;
    let mut count: usize = 0;
    let mut remainder = i;
    loop {
        let byte = match take::<usize, NomBytes, ()>(1)(remainder) {
            Ok((rest, bytes)) => {
                remainder = rest;
                let bytes = bytes.to_bytes();
                bytes.first().cloned().unwrap()
            }
            Err(_) => return Err(Incomplete(Unknown)),
        };
        res += ((byte as usize) & 127)
            .checked_shl((count * 7).try_into().unwrap_or(u32::MAX))
            .ok_or_else(|| Error(E::from_error_kind(remainder.clone(), ErrorKind::MapOpt)))?;
        count += 1;
        if (byte >> 7) == 0 {
            return Ok((remainder, res));
        }
    }
}

pub fn parse_string(s: NomBytes) -> IResult<NomBytes, Bytes> {
    let (s, length) = be_u16(s)?;
    let (s, string) = take(length)(s)?;
    Ok((s, string.into_bytes()))
}

pub fn parse_bytes(s: NomBytes) -> IResult<NomBytes, Bytes> {
    let (s, length) = be_u32(s)?;
    let (s, string) = take(length)(s)?;
    Ok((s, string.into_bytes()))
}

pub fn parse_array<O, E, F>(f: F) -> impl FnMut(NomBytes) -> IResult<NomBytes, Vec<O>, E>
where
    F: nom::Parser<NomBytes, O, E> + Copy,
    E: nom::error::ParseError<NomBytes>,
{
    move |input: NomBytes| {
        let i = input.clone();
        let (i, length) = be_i32(i)?;
        if length == -1 {
            return Ok((i, vec![]));
        }
        many_m_n(length as usize, length as usize, f)(i)
    }
}

pub fn parse_nullable_string(s: NomBytes) -> IResult<NomBytes, Option<Bytes>> {
    let (s, length) = be_i16(s)?;
    if length == -1 {
        return Ok((s, None));
    }

    let (s, string) = take(length as u16)(s)?;
    Ok((s, Some(string.into_bytes())))
}

/// Flexible-version string: uvarint length of `len + 1`.
pub fn parse_compact_string(s: NomBytes) -> IResult<NomBytes, Bytes> {
    let (s, length) = take_varint(s)?;
    if length == 0 {
        // null; surface it as empty like a -1 classic string
        return Ok((s, Bytes::new()));
    }
    let (s, string) = take(length - 1)(s)?;
    Ok((s, string.into_bytes()))
}

/// Flexible-version nullable string: uvarint 0 means null.
pub fn parse_compact_nullable_string(s: NomBytes) -> IResult<NomBytes, Option<Bytes>> {
    let (s, length) = take_varint(s)?;
    if length == 0 {
        return Ok((s, None));
    }
    let (s, string) = take(length - 1)(s)?;
    Ok((s, Some(string.into_bytes())))
}

/// Flexible-version bytes: uvarint length of `len + 1`.
pub fn parse_compact_bytes(s: NomBytes) -> IResult<NomBytes, Bytes> {
    let (s, length) = take_varint(s)?;
    if length == 0 {
        return Ok((s, Bytes::new()));
    }
    let (s, bytes) = take(length - 1)(s)?;
    Ok((s, bytes.into_bytes()))
}

/// Flexible-version array: uvarint count of `n + 1`, then `n` items.
pub fn parse_compact_array<O, E, F>(f: F) -> impl FnMut(NomBytes) -> IResult<NomBytes, Vec<O>, E>
where
    F: nom::Parser<NomBytes, O, E> + Copy,
    E: nom::error::ParseError<NomBytes>,
{
    move |input: NomBytes| {
        let (i, length) = take_varint(input)?;
        if length == 0 {
            return Ok((i, vec![]));
        }
        many_m_n(length - 1, length - 1, f)(i)
    }
}

/// Skip a tagged-fields block. Tags are currently unused by the client,
/// so each one is length-skipped without interpretation.
pub fn skip_tagged_fields(s: NomBytes) -> IResult<NomBytes, ()> {
    let (mut s, num_tags) = take_varint(s)?;
    for _ in 0..num_tags {
        let (rest, _tag) = take_varint::<nom::error::Error<NomBytes>>(s)?;
        let (rest, size) = take_varint(rest)?;
        let (rest, _) = take(size)(rest)?;
        s = rest;
    }
    Ok((s, ()))
}
