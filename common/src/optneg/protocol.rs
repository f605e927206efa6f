bitflags::bitflags! {
    /// Which SMTP stages the MTA reports and which reports it waits an
    /// answer for.
    ///
    /// The filter asks for everything and answers everything, the
    /// negotiated set is the intersection with the MTA's offer.
    #[derive(Debug, PartialEq, Eq, Clone, Copy)]
    pub struct Protocol: u32 {
        /// Do not report the connection
        const SMFIP_NOCONNECT = 1 << 0;
        /// Do not report HELO
        const SMFIP_NOHELO = 1 << 1;
        /// Do not report MAIL FROM
        const SMFIP_NOMAIL = 1 << 2;
        /// Do not report RCPT TO
        const SMFIP_NORCPT = 1 << 3;
        /// Do not send body chunks
        const SMFIP_NOBODY = 1 << 4;
        /// Do not send headers
        const SMFIP_NOHDRS = 1 << 5;
        /// Do not report the end of headers
        const SMFIP_NOEOH = 1 << 6;
        /// Headers are sent without waiting for an answer
        const SMFIP_NR_HDR = 1 << 7;
        /// Do not report unknown SMTP commands
        const SMFIP_NOUNKNOWN = 1 << 8;
        /// Do not report DATA
        const SMFIP_NODATA = 1 << 9;
        /// The MTA understands a `skip` answer to body chunks
        const SMFIP_SKIP = 1 << 10;
        /// Recipients the MTA already rejected are reported too
        const SMFIP_RCPT_REJ = 1 << 11;
        /// The connection is reported without waiting for an answer
        const SMFIP_NR_CONN = 1 << 12;
        /// HELO is reported without waiting for an answer
        const SMFIP_NR_HELO = 1 << 13;
        /// MAIL FROM is reported without waiting for an answer
        const SMFIP_NR_MAIL = 1 << 14;
        /// RCPT TO is reported without waiting for an answer
        const SMFIP_NR_RCPT = 1 << 15;
        /// DATA is reported without waiting for an answer
        const SMFIP_NR_DATA = 1 << 16;
        /// Unknown commands are reported without waiting for an answer
        const SMFIP_NR_UNKN = 1 << 17;
        /// The end of headers is reported without waiting for an answer
        const SMFIP_NR_EOH = 1 << 18;
        /// Body chunks are sent without waiting for an answer
        const SMFIP_NR_BODY = 1 << 19;
        /// Header values keep their leading space
        const SMFIP_HDR_LEADSPC = 1 << 20;
    }
}

impl Default for Protocol {
    /// Report everything, wait for every answer
    fn default() -> Self {
        Self::empty()
    }
}
