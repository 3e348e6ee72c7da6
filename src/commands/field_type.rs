/// Wire tags for the fields of a message payload.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FieldType {
    Namespace = 0,
    Table = 1,
    Key = 2,
    Digest = 4,
    TxnId = 5,
    TxnVersion = 6,
    TxnDeadline = 7,
    TaskId = 8,
    PartitionArray = 9,
    DigestArray = 10,
    MaxRecords = 11,
    IndexRange = 22,
    FilterExpression = 40,
    UdfPackage = 56,
    UdfFunction = 57,
    UdfArgs = 58,
    BatchIndex = 60,
}
