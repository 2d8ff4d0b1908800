//! Splits the body of a v9 or IPFIX message into its sets.
//!
//! Sets are self-delimited: each starts with a (set id, length) header and the next one
//! begins right after the declared length. A length that is too small or runs past the
//! end of the message leaves no way to find the next set, so iteration stops there.
//! Any other set-level error only skips the offending set.

use log::trace;
use std::collections::VecDeque;

use crate::error::DecodeError;
use crate::flow::codec::SetHeader;
use crate::flow::ipfix::{self, TemplateRecord, Withdrawal};
use crate::flow::{netflow9, Version};
use crate::template::Template;

#[derive(Debug, PartialEq, Eq, Clone)]
pub enum FlowSet<'a> {
    Template(Vec<Template>),
    OptionsTemplate(Vec<Template>),
    TemplateWithdraw(Vec<Withdrawal>),
    Data { template_id: u16, payload: &'a [u8] },
}

impl<'a> FlowSet<'a> {
    pub fn kind(&self) -> &'static str {
        match self {
            FlowSet::Template(_) => "template",
            FlowSet::OptionsTemplate(_) => "options template",
            FlowSet::TemplateWithdraw(_) => "template withdrawal",
            FlowSet::Data { .. } => "data",
        }
    }
}

/// Iterator over the sets of a message body (message header excluded).
pub struct FlowSets<'a> {
    version: Version,
    body: &'a [u8],
    offset: usize,
    queued: VecDeque<FlowSet<'a>>,
    done: bool,
}

pub fn split(version: Version, body: &[u8]) -> FlowSets<'_> {
    FlowSets { version, body, offset: 0, queued: VecDeque::new(), done: false }
}

/// Groups consecutive IPFIX template records by kind so definitions and withdrawals
/// are applied in the order they were sent.
fn group_ipfix(records: Vec<TemplateRecord>, options: bool, out: &mut VecDeque<FlowSet<'_>>) {
    for record in records {
        match record {
            TemplateRecord::Define(t) => match out.back_mut() {
                Some(FlowSet::Template(list)) if !options => list.push(t),
                Some(FlowSet::OptionsTemplate(list)) if options => list.push(t),
                _ if options => out.push_back(FlowSet::OptionsTemplate(vec![t])),
                _ => out.push_back(FlowSet::Template(vec![t])),
            },
            TemplateRecord::Withdraw(w) => match out.back_mut() {
                Some(FlowSet::TemplateWithdraw(list)) => list.push(w),
                _ => out.push_back(FlowSet::TemplateWithdraw(vec![w])),
            },
        }
    }
}

impl<'a> FlowSets<'a> {
    fn read_set(&mut self, id: u16, content: &'a [u8]) -> Result<(), DecodeError> {
        let mut sets = VecDeque::new();

        match (self.version, id) {
            (_, id) if id >= 256 => sets.push_back(FlowSet::Data { template_id: id, payload: content }),
            (Version::NetflowV9, netflow9::TEMPLATE_FLOWSET_ID) => {
                sets.push_back(FlowSet::Template(netflow9::read_template_set(content)?))
            }
            (Version::NetflowV9, netflow9::OPTIONS_TEMPLATE_FLOWSET_ID) => {
                sets.push_back(FlowSet::OptionsTemplate(netflow9::read_options_template_set(content)?))
            }
            (Version::Ipfix, ipfix::TEMPLATE_SET_ID) => group_ipfix(ipfix::read_template_set(content, false)?, false, &mut sets),
            (Version::Ipfix, ipfix::OPTIONS_TEMPLATE_SET_ID) => {
                group_ipfix(ipfix::read_template_set(content, true)?, true, &mut sets)
            }
            (_, id) => return Err(DecodeError::ReservedSetId(id)),
        }

        self.queued.extend(sets);
        Ok(())
    }
}

impl<'a> Iterator for FlowSets<'a> {
    type Item = Result<FlowSet<'a>, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(set) = self.queued.pop_front() {
                return Some(Ok(set));
            }

            if self.done {
                return None;
            }

            let rest = &self.body[self.offset..];
            if rest.len() < SetHeader::SIZE {
                self.done = true;
                if rest.iter().any(|b| *b != 0) {
                    return Some(Err(DecodeError::Truncated { what: "set header", need: SetHeader::SIZE, have: rest.len() }));
                }
                return None;
            }

            let header = match SetHeader::read(rest) {
                Ok(header) => header,
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            };

            if (header.length as usize) < SetHeader::SIZE || header.length as usize > rest.len() {
                self.done = true;
                return Some(Err(DecodeError::InvalidSetLength { set_id: header.id, length: header.length, remaining: rest.len() }));
            }

            let content = &rest[SetHeader::SIZE..header.length as usize];
            self.offset += header.length as usize;
            trace!("set id: {}, length: {}", header.id, header.length);

            if let Err(e) = self.read_set(header.id, content) {
                return Some(Err(e));
            }
        }
    }
}
