//! SQLx 数据库类型转换实现
//!
//! 枚举在SQLite中以文本形式存储，文本取值与 `as_str` 一致。

use super::{AnalysisStatus, ClusterLevel, ComparisonStrategy, ExecutionStatus, MLAnalysisType, ServiceApiVersion};

macro_rules! sqlite_text_enum {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl sqlx::Type<sqlx::Sqlite> for $ty {
                fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
                    <str as sqlx::Type<sqlx::Sqlite>>::type_info()
                }
            }

            impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for $ty {
                fn decode(value: sqlx::sqlite::SqliteValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
                    let s = <&str as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
                    Ok(s.parse::<$ty>()?)
                }
            }

            impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for $ty {
                fn encode_by_ref(
                    &self,
                    buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
                ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
                    <&str as sqlx::Encode<sqlx::Sqlite>>::encode(self.as_str(), buf)
                }
            }
        )+
    };
}

sqlite_text_enum!(
    ClusterLevel,
    ExecutionStatus,
    MLAnalysisType,
    ServiceApiVersion,
    ComparisonStrategy,
    AnalysisStatus,
);
